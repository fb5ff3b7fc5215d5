//! Run command - drive one lifecycle scenario against a live model
//!
//! Usage: provtest run <plain|upgrade> [--config <file>] [--working-dir <dir>]
//!
//! Pins the provider, applies, waits for the units to settle, optionally
//! rebuilds the provider from source and re-applies, then destroys. Fallback
//! cleanup always runs, and the command exits non-zero if any phase failed.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use provtest_common::retry::RetryPolicy;

use super::generate_run_id;
use super::lifecycle::{Lifecycle, LifecycleSettings, Scenario};
use super::provisioner::TerraformDriver;
use super::report::RunReport;
use super::settle::JujuWaiter;
use super::upgrade::SourceBuilder;
use crate::config::HarnessConfig;
use crate::Result;

/// Run a deploy/upgrade/destroy lifecycle
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario to run
    #[arg(value_enum)]
    pub scenario: Scenario,

    /// Harness configuration file (YAML)
    #[arg(short = 'c', long, env = "PROVTEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the Terraform configuration under test
    #[arg(short = 'w', long, env = "PROVTEST_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Provider version pinned before the first apply
    #[arg(long, env = "PROVTEST_BASELINE_VERSION")]
    pub baseline_version: Option<String>,

    /// Git ref built for the upgrade scenario
    #[arg(long, env = "PROVTEST_UPGRADE_REF")]
    pub upgrade_ref: Option<String>,

    /// Juju model to wait on
    #[arg(short = 'm', long, env = "PROVTEST_MODEL")]
    pub model: Option<String>,

    /// Timeout passed to `juju wait-for` (e.g. "30m")
    #[arg(long, env = "PROVTEST_SETTLE_TIMEOUT")]
    pub settle_timeout: Option<String>,

    /// Disable retries of transient provisioner failures
    #[arg(long)]
    pub no_retry: bool,

    /// Write a JSON run report to this path
    #[arg(long, env = "PROVTEST_REPORT")]
    pub report: Option<PathBuf>,

    /// Run ID for this session (auto-generated if not provided).
    /// Used to name the per-run build directory.
    #[arg(long, env = "PROVTEST_RUN_ID")]
    pub run_id: Option<String>,
}

impl RunArgs {
    /// Layer command-line values over the file configuration
    pub fn apply_to(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(dir) = &self.working_dir {
            config.working_dir = dir.clone();
        }
        if let Some(version) = &self.baseline_version {
            config.baseline_version = Some(version.clone());
        }
        if let Some(reference) = &self.upgrade_ref {
            config.upgrade_ref = reference.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(timeout) = &self.settle_timeout {
            config.settle_timeout = Some(timeout.clone());
        }
        config
    }
}

/// Wire the real collaborators from configuration
pub fn build_lifecycle(config: &HarnessConfig, retry: RetryPolicy, run_id: &str) -> Result<Lifecycle> {
    let settings = LifecycleSettings::from_config(config, run_id)?;
    let driver = TerraformDriver::new(config.tools.terraform.as_str(), retry);
    let mut waiter = JujuWaiter::new(config.tools.juju.as_str(), config.model.as_str());
    if let Some(timeout) = &config.settle_timeout {
        waiter = waiter.with_timeout(timeout.as_str());
    }
    let builder = SourceBuilder::from_config(config)?;
    Ok(Lifecycle::new(
        Arc::new(driver),
        Arc::new(waiter),
        Arc::new(builder),
        settings,
    ))
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.apply_to(HarnessConfig::load(args.config.as_deref())?);
    config.validate()?;
    let retry = if args.no_retry {
        RetryPolicy::none()
    } else {
        config.retry_policy()?
    };
    let run_id = args.run_id.clone().unwrap_or_else(generate_run_id);

    info!(
        run_id = %run_id,
        scenario = %args.scenario,
        working_dir = %config.working_dir.display(),
        model = %config.model,
        "Lifecycle configuration loaded"
    );

    let lifecycle = build_lifecycle(&config, retry, &run_id)?;
    let record = lifecycle.run(args.scenario).await;

    let report = RunReport::from_record(&record);
    report.log_summary();
    if let Some(path) = &args.report {
        report.write(path)?;
    }
    record.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn parses_scenario_and_overrides() {
        let h = Harness::parse_from([
            "provtest",
            "upgrade",
            "--working-dir",
            "/srv/deploy",
            "--upgrade-ref",
            "main",
            "--model",
            "ci",
        ]);
        assert_eq!(h.args.scenario, Scenario::Upgrade);

        let config = h.args.apply_to(HarnessConfig::default());
        assert_eq!(config.working_dir, PathBuf::from("/srv/deploy"));
        assert_eq!(config.upgrade_ref, "main");
        assert_eq!(config.model, "ci");
        assert_eq!(config.baseline_version, None);
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(Harness::try_parse_from(["provtest", "sideways"]).is_err());
    }

    #[test]
    fn lifecycle_wires_from_defaults() {
        let lifecycle =
            build_lifecycle(&HarnessConfig::default(), RetryPolicy::none(), "feed42").unwrap();
        assert!(lifecycle
            .settings()
            .build_dir()
            .ends_with("provtest-build-feed42"));
    }
}
