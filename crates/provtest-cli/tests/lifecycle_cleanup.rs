//! Cleanup guarantee of the lifecycle orchestrator
//!
//! Drives both scenarios through recording fakes, failing or panicking at
//! each phase in turn, and checks that the fallback cleanup ran exactly once
//! and left the working directory as it found it.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use rstest::rstest;

use provtest_cli::commands::lifecycle::{Lifecycle, LifecycleSettings, LifecycleState, Scenario};
use provtest_cli::commands::provisioner::{ProvisionOptions, Provisioner};
use provtest_cli::commands::settle::{SettleCondition, SettleWaiter};
use provtest_cli::commands::upgrade::{UpgradeArtifact, UpgradeBuilder};
use provtest_cli::{Error, Result};
use provtest_common::template::ProviderAddress;

const APPLY_OK: &str = "Apply complete! Resources: 2 added, 0 changed, 0 destroyed.";
const REAPPLY_OK: &str = "Apply complete! Resources: 0 added, 0 changed, 0 destroyed.";
const DESTROY_OK: &str = "Destroy complete! Resources: 2 destroyed.";

/// How a fake reacts when its call is the one under test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Fail,
    Panic,
}

/// Shared call log plus the call (by position in the log) that misbehaves
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    fault: Option<(usize, Fault)>,
}

impl Recorder {
    fn with_fault(index: usize, fault: Fault) -> Self {
        Self {
            fault: Some((index, fault)),
            ..Self::default()
        }
    }

    /// Log `call`; returns an error if it is the faulty one
    fn record(&self, call: impl Into<String>) -> Result<()> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call.into());
            calls.len() - 1
        };
        match self.fault {
            Some((i, Fault::Fail)) if i == index => Err(Error::command_failed("injected failure")),
            Some((i, Fault::Panic)) if i == index => panic!("injected panic"),
            _ => Ok(()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct FakeProvisioner {
    rec: Recorder,
    applies: Mutex<u32>,
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn init_and_apply(&self, options: &ProvisionOptions) -> Result<String> {
        let tag = if options.override_config().is_some() {
            "apply+override"
        } else {
            "apply"
        };
        self.rec.record(tag)?;
        let mut applies = self.applies.lock().unwrap();
        *applies += 1;
        Ok(if *applies == 1 { APPLY_OK } else { REAPPLY_OK }.to_string())
    }

    async fn destroy(&self, _options: &ProvisionOptions) -> Result<String> {
        self.rec.record("destroy")?;
        Ok(DESTROY_OK.to_string())
    }

    async fn init_only(&self, _options: &ProvisionOptions) -> Result<()> {
        self.rec.record("init")
    }
}

struct FakeWaiter {
    rec: Recorder,
}

#[async_trait]
impl SettleWaiter for FakeWaiter {
    async fn wait_for_settled(&self, condition: SettleCondition) -> Result<Duration> {
        let tag = match condition {
            SettleCondition::UnitsActiveIdle => "settle",
            SettleCondition::ModelIdle => "idle",
        };
        self.rec.record(tag)?;
        Ok(Duration::ZERO)
    }
}

struct FakeBuilder {
    rec: Recorder,
}

#[async_trait]
impl UpgradeBuilder for FakeBuilder {
    async fn build(
        &self,
        _baseline_version: &str,
        _target_ref: &str,
        build_dir: &Path,
    ) -> Result<UpgradeArtifact> {
        std::fs::write(build_dir.join("terraform-provider-juju"), "binary").unwrap();
        self.rec.record("build")?;
        Ok(UpgradeArtifact {
            build_dir: build_dir.to_path_buf(),
            source_dir: build_dir.join("source"),
            bin_dir: build_dir.to_path_buf(),
            override_config: build_dir.join("provider-override.tfrc"),
            commit: None,
        })
    }
}

struct Workspace {
    _root: tempfile::TempDir,
    settings: LifecycleSettings,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let working_dir = root.path().join("plan");
        std::fs::create_dir_all(&working_dir).unwrap();
        std::fs::write(working_dir.join("versions.tf"), "# original pin\n").unwrap();
        std::fs::write(working_dir.join("terraform.tfstate"), "{}").unwrap();
        let plugin_cache = root.path().join("plugins");
        std::fs::create_dir_all(&plugin_cache).unwrap();

        let settings = LifecycleSettings {
            run_id: "c1ea17".to_string(),
            versions_file: working_dir.join("versions.tf"),
            working_dir,
            provider: ProviderAddress::new("juju", "juju").unwrap(),
            baseline_version: Some("0.22.0".to_string()),
            upgrade_baseline: "0.22.0".to_string(),
            upgrade_ref: "v1.0.0-beta2".to_string(),
            plugin_cache_dir: Some(plugin_cache),
            build_root: root.path().join("tmp"),
        };
        Self {
            _root: root,
            settings,
        }
    }

    fn lifecycle(&self, rec: &Recorder) -> Lifecycle {
        Lifecycle::new(
            Arc::new(FakeProvisioner {
                rec: rec.clone(),
                applies: Mutex::new(0),
            }),
            Arc::new(FakeWaiter { rec: rec.clone() }),
            Arc::new(FakeBuilder { rec: rec.clone() }),
            self.settings.clone(),
        )
    }

    fn assert_restored(&self) {
        let pin = std::fs::read_to_string(&self.settings.versions_file).unwrap();
        assert_eq!(pin, "# original pin\n");
        assert!(!self.backup_path().exists());
        assert!(!self.settings.working_dir.join("terraform.tfstate").exists());
        assert!(!self.settings.build_dir().exists());
    }

    fn backup_path(&self) -> PathBuf {
        self.settings
            .working_dir
            .join("versions.tf.bak.original")
    }
}

/// Calls the phases make in a clean run
fn phase_calls(scenario: Scenario) -> Vec<&'static str> {
    match scenario {
        Scenario::Plain => vec!["apply", "settle", "destroy", "idle"],
        Scenario::Upgrade => vec![
            "apply",
            "settle",
            "build",
            "apply+override",
            "settle",
            "destroy",
            "idle",
        ],
    }
}

/// Calls the fallback cleanup makes
fn cleanup_calls(scenario: Scenario) -> Vec<&'static str> {
    match scenario {
        Scenario::Plain => vec!["destroy", "idle"],
        Scenario::Upgrade => vec!["init", "destroy", "idle"],
    }
}

#[tokio::test]
async fn clean_plain_run_cleans_up_once() {
    let ws = Workspace::new();
    let rec = Recorder::default();

    let record = ws.lifecycle(&rec).run(Scenario::Plain).await;

    assert!(record.passed(), "{:?}", record.outcome);
    let mut expected = phase_calls(Scenario::Plain);
    expected.extend(cleanup_calls(Scenario::Plain));
    assert_eq!(rec.calls(), expected);
    ws.assert_restored();
}

#[tokio::test]
async fn clean_upgrade_run_purges_local_provider_state() {
    let ws = Workspace::new();
    let lock = ws.settings.working_dir.join(".terraform.lock.hcl");
    let cache = ws.settings.working_dir.join(".terraform");
    std::fs::write(&lock, "lock").unwrap();
    std::fs::create_dir_all(cache.join("providers")).unwrap();
    let rec = Recorder::default();

    let record = ws.lifecycle(&rec).run(Scenario::Upgrade).await;

    assert!(record.passed(), "{:?}", record.outcome);
    let mut expected = phase_calls(Scenario::Upgrade);
    expected.extend(cleanup_calls(Scenario::Upgrade));
    assert_eq!(rec.calls(), expected);
    assert!(!lock.exists());
    assert!(!cache.exists());
    assert!(!ws.settings.plugin_cache_dir.as_ref().unwrap().exists());
    ws.assert_restored();
}

#[rstest]
#[tokio::test]
async fn failure_at_any_phase_cleans_up_once(
    #[values(Scenario::Plain, Scenario::Upgrade)] scenario: Scenario,
    #[values(0, 1, 2, 3, 4, 5, 6)] failing_call: usize,
) {
    let phases = phase_calls(scenario);
    if failing_call >= phases.len() {
        return;
    }
    let ws = Workspace::new();
    let rec = Recorder::with_fault(failing_call, Fault::Fail);

    let record = ws.lifecycle(&rec).run(scenario).await;

    assert!(!record.passed());
    let failed_phase = record.failed_phase.expect("failed phase recorded");
    assert_ne!(failed_phase, LifecycleState::Init);
    let mut expected: Vec<&str> = phases[..=failing_call].to_vec();
    expected.extend(cleanup_calls(scenario));
    assert_eq!(rec.calls(), expected);
    ws.assert_restored();
}

#[rstest]
#[case::plain_apply(Scenario::Plain, 0)]
#[case::plain_settle(Scenario::Plain, 1)]
#[case::upgrade_build(Scenario::Upgrade, 2)]
#[case::upgrade_reapply(Scenario::Upgrade, 3)]
#[tokio::test]
async fn panic_in_a_phase_still_cleans_up(#[case] scenario: Scenario, #[case] panicking_call: usize) {
    let ws = Workspace::new();
    let rec = Recorder::with_fault(panicking_call, Fault::Panic);
    let lifecycle = ws.lifecycle(&rec);

    let result = AssertUnwindSafe(lifecycle.run(scenario))
        .catch_unwind()
        .await;

    assert!(result.is_err(), "panic should propagate after cleanup");
    let mut expected: Vec<&str> = phase_calls(scenario)[..=panicking_call].to_vec();
    expected.extend(cleanup_calls(scenario));
    assert_eq!(rec.calls(), expected);
    ws.assert_restored();
}

#[tokio::test]
async fn failing_cleanup_step_does_not_stop_the_rest() {
    let ws = Workspace::new();
    // The destroy in cleanup is call 4 of a plain run
    let rec = Recorder::with_fault(4, Fault::Fail);

    let record = ws.lifecycle(&rec).run(Scenario::Plain).await;

    assert!(record.passed(), "cleanup failures are not run failures");
    assert_eq!(record.cleanup.failures().collect::<Vec<_>>(), vec!["destroy"]);
    assert_eq!(rec.calls().last().map(String::as_str), Some("idle"));
    ws.assert_restored();
}
