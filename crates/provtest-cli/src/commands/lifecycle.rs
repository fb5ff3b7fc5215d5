//! Lifecycle orchestrator
//!
//! Sequences apply, settle, optional upgrade, re-apply and destroy, checking
//! the provisioner's summary after every apply or destroy. Fallback cleanup
//! runs exactly once at the end of every run, whether the phases succeeded,
//! returned an error or panicked.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{info, warn};

use provtest_common::summary::{self, SummaryKind};
use provtest_common::template::{self, ProviderAddress};
use provtest_common::{CACHE_DIR_NAME, LOCK_FILE_NAME, STATE_FILE_NAME};

use super::provisioner::{ProvisionOptions, Provisioner};
use super::settle::{SettleCondition, SettleWaiter};
use super::upgrade::{UpgradeArtifact, UpgradeBuilder};
use crate::config::HarnessConfig;
use crate::{Error, Result};

/// Suffix of the copy kept while a configuration file is replaced
pub const BACKUP_SUFFIX: &str = ".bak.original";

/// Lifecycle states, in the order a run can visit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Init,
    Applied,
    Settled,
    Upgrading,
    ReApplied,
    ReSettled,
    Destroying,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Init => "init",
            LifecycleState::Applied => "applied",
            LifecycleState::Settled => "settled",
            LifecycleState::Upgrading => "upgrading",
            LifecycleState::ReApplied => "re-applied",
            LifecycleState::ReSettled => "re-settled",
            LifecycleState::Destroying => "destroying",
            LifecycleState::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

/// Which lifecycle to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Deploy, settle, destroy
    Plain,
    /// Deploy the released provider, switch to a source build, re-apply, destroy
    Upgrade,
}

impl Scenario {
    /// States this scenario walks through, in order
    pub fn phases(self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Scenario::Plain => &[Init, Applied, Settled, Destroying, Destroyed],
            Scenario::Upgrade => &[
                Init, Applied, Settled, Upgrading, ReApplied, ReSettled, Destroying, Destroyed,
            ],
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Plain => write!(f, "plain"),
            Scenario::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// A completed phase on the run timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseOutcome {
    pub phase: LifecycleState,
    pub completed_at: DateTime<Utc>,
    /// Time since the previous mark
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Monotonic sequence of phase completions
#[derive(Debug)]
pub struct Timeline {
    last: Instant,
    outcomes: Vec<PhaseOutcome>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            outcomes: Vec::new(),
        }
    }

    /// Record `phase` as completed now; returns the time since the last mark
    pub fn mark(&mut self, phase: LifecycleState) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        self.outcomes.push(PhaseOutcome {
            phase,
            completed_at: Utc::now(),
            elapsed,
        });
        elapsed
    }

    pub fn into_outcomes(self) -> Vec<PhaseOutcome> {
        self.outcomes
    }
}

/// A configuration file replaced for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backup {
    /// The file existed and was copied aside
    Copied { original: PathBuf, backup: PathBuf },
    /// The file did not exist; restoring removes whatever was written
    Absent { original: PathBuf },
}

impl Backup {
    /// Copy `path` aside, refusing to clobber a backup left by an earlier run
    pub fn take(path: &Path) -> Result<Self> {
        let backup = backup_path(path);
        if backup.exists() {
            return Err(Error::validation(format!(
                "stale backup {} exists; restore it over {} before running again",
                backup.display(),
                path.display()
            )));
        }
        if !path.exists() {
            return Ok(Backup::Absent {
                original: path.to_path_buf(),
            });
        }
        std::fs::copy(path, &backup).map_err(|e| provtest_common::Error::io(&backup, e))?;
        Ok(Backup::Copied {
            original: path.to_path_buf(),
            backup,
        })
    }

    /// Put the original content back
    pub fn restore(&self) -> std::io::Result<()> {
        match self {
            Backup::Copied { original, backup } => std::fs::rename(backup, original),
            Backup::Absent { original } => remove_file_if_exists(original),
        }
    }

    pub fn original(&self) -> &Path {
        match self {
            Backup::Copied { original, .. } | Backup::Absent { original } => original,
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// One best-effort cleanup step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupStep {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What the fallback cleanup did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub steps: Vec<CleanupStep>,
}

impl CleanupReport {
    fn record<E: fmt::Display>(&mut self, name: impl Into<String>, result: std::result::Result<(), E>) {
        let name = name.into();
        let message = match result {
            Ok(()) => None,
            Err(e) => {
                warn!(step = %name, error = %e, "Cleanup step failed, continuing");
                Some(e.to_string())
            }
        };
        self.steps.push(CleanupStep {
            ok: message.is_none(),
            name,
            message,
        });
    }

    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }

    /// Names of the failed steps
    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter(|s| !s.ok).map(|s| s.name.as_str())
    }
}

/// Everything a run needs besides its collaborators
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub run_id: String,
    pub working_dir: PathBuf,
    pub versions_file: PathBuf,
    pub provider: ProviderAddress,
    /// Pinned for the plain scenario when set
    pub baseline_version: Option<String>,
    /// Pinned (and passed to the builder) for the upgrade scenario
    pub upgrade_baseline: String,
    pub upgrade_ref: String,
    /// Purged during upgrade cleanup
    pub plugin_cache_dir: Option<PathBuf>,
    /// Parent of the per-run build directory
    pub build_root: PathBuf,
}

impl LifecycleSettings {
    pub fn from_config(config: &HarnessConfig, run_id: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let plugin_cache_dir = match config.plugin_cache_dir() {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!(error = %e, "No plugin cache directory, upgrade cleanup will skip it");
                None
            }
        };
        Ok(Self {
            run_id: run_id.into(),
            working_dir: config.working_dir.clone(),
            versions_file: config.versions_path(),
            provider: config.provider_address()?,
            baseline_version: config.baseline_version.clone(),
            upgrade_baseline: config.upgrade_baseline().to_string(),
            upgrade_ref: config.upgrade_ref.clone(),
            plugin_cache_dir,
            build_root: std::env::temp_dir(),
        })
    }

    /// Version pinned before the first apply
    pub fn baseline(&self, scenario: Scenario) -> Option<&str> {
        match scenario {
            Scenario::Plain => self.baseline_version.as_deref(),
            Scenario::Upgrade => Some(self.upgrade_baseline.as_str()),
        }
    }

    /// Per-run build directory
    pub fn build_dir(&self) -> PathBuf {
        self.build_root
            .join(format!("provtest-build-{}", self.run_id))
    }
}

/// Result of one lifecycle run
#[derive(Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub scenario: Scenario,
    pub phases: Vec<PhaseOutcome>,
    /// Phase that was running when the run failed
    pub failed_phase: Option<LifecycleState>,
    pub outcome: Result<()>,
    pub cleanup: CleanupReport,
    pub artifact: Option<UpgradeArtifact>,
}

impl RunRecord {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<()> {
        self.outcome
    }
}

/// Mutable per-run state shared by the phases and the cleanup
struct RunContext {
    timeline: Timeline,
    current: LifecycleState,
    options: ProvisionOptions,
    backups: Vec<Backup>,
    build_dir: Option<PathBuf>,
    artifact: Option<UpgradeArtifact>,
}

/// Drives the provisioner through a scenario
pub struct Lifecycle {
    provisioner: Arc<dyn Provisioner>,
    waiter: Arc<dyn SettleWaiter>,
    builder: Arc<dyn UpgradeBuilder>,
    settings: LifecycleSettings,
}

impl Lifecycle {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        waiter: Arc<dyn SettleWaiter>,
        builder: Arc<dyn UpgradeBuilder>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            provisioner,
            waiter,
            builder,
            settings,
        }
    }

    #[cfg(test)]
    pub(crate) fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Run `scenario` to completion, then clean up.
    ///
    /// A panic inside a phase is re-raised after cleanup has run.
    pub async fn run(&self, scenario: Scenario) -> RunRecord {
        info!(run_id = %self.settings.run_id, %scenario, "Starting lifecycle run");
        let mut ctx = RunContext {
            timeline: Timeline::new(),
            current: LifecycleState::Init,
            options: ProvisionOptions::new(&self.settings.working_dir),
            backups: Vec::new(),
            build_dir: None,
            artifact: None,
        };

        let outcome = AssertUnwindSafe(self.run_phases(scenario, &mut ctx))
            .catch_unwind()
            .await;
        let cleanup = self.cleanup(scenario, &mut ctx).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                warn!(phase = %ctx.current, "Phase panicked, cleanup done, re-raising");
                std::panic::resume_unwind(panic)
            }
        };

        let failed_phase = match &outcome {
            Ok(()) => None,
            Err(e) => {
                warn!(phase = %ctx.current, error = %e, "Lifecycle run failed");
                Some(ctx.current)
            }
        };

        RunRecord {
            run_id: self.settings.run_id.clone(),
            scenario,
            phases: ctx.timeline.into_outcomes(),
            failed_phase,
            outcome,
            cleanup,
            artifact: ctx.artifact,
        }
    }

    async fn run_phases(&self, scenario: Scenario, ctx: &mut RunContext) -> Result<()> {
        for (i, &phase) in scenario.phases().iter().enumerate() {
            ctx.current = phase;
            info!("[Phase {}] {}...", i + 1, phase_banner(phase));
            self.run_phase(scenario, phase, ctx).await?;
            let elapsed = ctx.timeline.mark(phase);
            info!(%phase, ?elapsed, "Phase complete");
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        scenario: Scenario,
        phase: LifecycleState,
        ctx: &mut RunContext,
    ) -> Result<()> {
        match phase {
            LifecycleState::Init => self.prepare(scenario, ctx),
            LifecycleState::Applied => {
                let output = self.provisioner.init_and_apply(&ctx.options).await?;
                summary::verify(SummaryKind::Apply, &output)?;
                Ok(())
            }
            LifecycleState::ReApplied => {
                let output = self.provisioner.init_and_apply(&ctx.options).await?;
                summary::verify(SummaryKind::ReApply, &output)?;
                Ok(())
            }
            LifecycleState::Settled | LifecycleState::ReSettled => {
                self.waiter
                    .wait_for_settled(SettleCondition::UnitsActiveIdle)
                    .await?;
                Ok(())
            }
            LifecycleState::Upgrading => self.upgrade(scenario, ctx).await,
            LifecycleState::Destroying => {
                let output = self.provisioner.destroy(&ctx.options).await?;
                summary::verify(SummaryKind::Destroy, &output)?;
                Ok(())
            }
            LifecycleState::Destroyed => {
                self.waiter
                    .wait_for_settled(SettleCondition::ModelIdle)
                    .await?;
                Ok(())
            }
        }
    }

    /// Back up and write the version pin
    fn prepare(&self, scenario: Scenario, ctx: &mut RunContext) -> Result<()> {
        let Some(version) = self.settings.baseline(scenario) else {
            info!("No baseline version, leaving the provider pin untouched");
            return Ok(());
        };
        template::validate_reference("baseline version", version)?;
        let path = &self.settings.versions_file;
        ctx.backups.push(Backup::take(path)?);
        template::write_version_pin(path, &self.settings.provider, version)?;
        info!(version, file = %path.display(), "Pinned provider version");
        Ok(())
    }

    async fn upgrade(&self, scenario: Scenario, ctx: &mut RunContext) -> Result<()> {
        let build_dir = self.settings.build_dir();
        ctx.build_dir = Some(build_dir.clone());
        std::fs::create_dir_all(&build_dir)
            .map_err(|e| provtest_common::Error::io(&build_dir, e))?;

        let baseline = self
            .settings
            .baseline(scenario)
            .unwrap_or(self.settings.upgrade_baseline.as_str());
        let artifact = self
            .builder
            .build(baseline, &self.settings.upgrade_ref, &build_dir)
            .await?;
        ctx.options = ctx.options.with_override_config(&artifact.override_config);
        ctx.artifact = Some(artifact);
        Ok(())
    }

    /// Fallback cleanup; every step is best-effort
    async fn cleanup(&self, scenario: Scenario, ctx: &mut RunContext) -> CleanupReport {
        info!("[Cleanup] Tearing down...");
        let mut report = CleanupReport::default();
        let working_dir = &self.settings.working_dir;

        if scenario == Scenario::Upgrade {
            report.record(
                "remove lock file",
                remove_file_if_exists(&working_dir.join(LOCK_FILE_NAME)),
            );
            report.record(
                "remove provider cache",
                remove_dir_if_exists(&working_dir.join(CACHE_DIR_NAME)),
            );
            match &self.settings.plugin_cache_dir {
                Some(dir) => report.record("remove plugin cache", remove_dir_if_exists(dir)),
                None => report.record(
                    "remove plugin cache",
                    Err("plugin cache directory unknown"),
                ),
            }
            let result = self.provisioner.init_only(&ctx.options).await;
            report.record("init", result);
        }

        // Counts are not checked here; the resources may be partly gone already
        let result = self.provisioner.destroy(&ctx.options).await.map(|_| ());
        report.record("destroy", result);

        let result = self
            .waiter
            .wait_for_settled(SettleCondition::ModelIdle)
            .await
            .map(|_| ());
        report.record("settle", result);

        report.record(
            "remove state file",
            remove_file_if_exists(&working_dir.join(STATE_FILE_NAME)),
        );

        for backup in ctx.backups.drain(..).rev() {
            let name = format!("restore {}", backup.original().display());
            report.record(name, backup.restore());
        }

        if let Some(dir) = ctx.build_dir.take() {
            report.record("remove build directory", remove_dir_if_exists(&dir));
        }

        if report.is_clean() {
            info!("Cleanup complete");
        } else {
            let failed: Vec<&str> = report.failures().collect();
            warn!(failed = ?failed, "Cleanup finished with failures");
        }
        report
    }
}

fn phase_banner(phase: LifecycleState) -> &'static str {
    match phase {
        LifecycleState::Init => "Pinning provider version",
        LifecycleState::Applied => "Applying configuration",
        LifecycleState::Settled => "Waiting for units to settle",
        LifecycleState::Upgrading => "Building provider from source",
        LifecycleState::ReApplied => "Re-applying with the upgraded provider",
        LifecycleState::ReSettled => "Waiting for units to settle after upgrade",
        LifecycleState::Destroying => "Destroying resources",
        LifecycleState::Destroyed => "Waiting for model to go idle",
    }
}
