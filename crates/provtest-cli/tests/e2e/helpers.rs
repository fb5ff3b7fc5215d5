//! Test helpers for live e2e tests
#![cfg(feature = "live-e2e")]

use std::path::PathBuf;
use std::sync::OnceLock;

use provtest_cli::commands::generate_run_id;
use provtest_cli::commands::lifecycle::{RunRecord, Scenario};
use provtest_cli::commands::report::RunReport;
use provtest_cli::commands::run::build_lifecycle;
use provtest_cli::config::HarnessConfig;
use provtest_common::telemetry::{init_logging, DEFAULT_LOG_DIRECTIVE};

static RUN_ID: OnceLock<String> = OnceLock::new();

/// Unique run ID for this test process (`PROVTEST_RUN_ID` wins)
pub fn run_id() -> &'static str {
    RUN_ID.get_or_init(|| std::env::var("PROVTEST_RUN_ID").unwrap_or_else(|_| generate_run_id()))
}

pub fn init_tracing() {
    let _ = init_logging(DEFAULT_LOG_DIRECTIVE);
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Harness configuration from `PROVTEST_*` variables
pub fn config_from_env() -> HarnessConfig {
    let path = env("PROVTEST_CONFIG").map(PathBuf::from);
    let mut config = HarnessConfig::load(path.as_deref()).expect("load harness config");
    if let Some(dir) = env("PROVTEST_WORKING_DIR") {
        config.working_dir = PathBuf::from(dir);
    }
    if let Some(model) = env("PROVTEST_MODEL") {
        config.model = model;
    }
    if let Some(version) = env("PROVTEST_BASELINE_VERSION") {
        config.baseline_version = Some(version);
    }
    if let Some(reference) = env("PROVTEST_UPGRADE_REF") {
        config.upgrade_ref = reference;
    }
    config.validate().expect("valid harness config");
    config
}

/// Run `scenario` with the real collaborators and log the timeline
pub async fn run_scenario(scenario: Scenario) -> RunRecord {
    init_tracing();
    let config = config_from_env();
    let retry = config.retry_policy().expect("retry policy");
    let run_id = format!("{}-{}", run_id(), scenario);
    let lifecycle = build_lifecycle(&config, retry, &run_id).expect("wire lifecycle");
    let record = lifecycle.run(scenario).await;
    RunReport::from_record(&record).log_summary();
    record
}
