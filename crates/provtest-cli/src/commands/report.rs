//! Run report: timeline summary in the log, optional JSON file

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::lifecycle::{CleanupReport, LifecycleState, PhaseOutcome, RunRecord, Scenario};
use crate::Result;

/// Serializable summary of a lifecycle run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub scenario: Scenario,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<LifecycleState>,
    pub phases: Vec<PhaseOutcome>,
    pub cleanup: CleanupReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgraded_commit: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl RunReport {
    pub fn from_record(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            scenario: record.scenario,
            passed: record.passed(),
            error: record.outcome.as_ref().err().map(|e| e.to_string()),
            failed_phase: record.failed_phase,
            phases: record.phases.clone(),
            cleanup: record.cleanup.clone(),
            upgraded_commit: record.artifact.as_ref().and_then(|a| a.commit.clone()),
            generated_at: Utc::now(),
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), "Wrote run report");
        Ok(())
    }

    /// Timeline summary at the end of a run
    pub fn log_summary(&self) {
        info!("=== {} run {} ===", self.scenario, self.run_id);
        for phase in &self.phases {
            info!(
                phase = %phase.phase,
                elapsed = ?phase.elapsed,
                "  {:<12} passed",
                phase.phase.to_string()
            );
        }
        if let Some(phase) = self.failed_phase {
            warn!(%phase, error = self.error.as_deref().unwrap_or(""), "  {:<12} FAILED", phase.to_string());
        }
        for step in self.cleanup.steps.iter().filter(|s| !s.ok) {
            warn!(step = %step.name, "  cleanup step failed");
        }
        if self.passed {
            info!("Run {} PASSED", self.run_id);
        } else {
            warn!("Run {} FAILED", self.run_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::time::Duration;

    fn record(outcome: crate::Result<()>) -> RunRecord {
        let failed = outcome.is_err().then_some(LifecycleState::Settled);
        RunRecord {
            run_id: "0a1b2c".to_string(),
            scenario: Scenario::Plain,
            phases: vec![PhaseOutcome {
                phase: LifecycleState::Init,
                completed_at: Utc::now(),
                elapsed: Duration::from_millis(1500),
            }],
            failed_phase: failed,
            outcome,
            cleanup: CleanupReport::default(),
            artifact: None,
        }
    }

    #[test]
    fn passing_report_omits_error() {
        let report = RunReport::from_record(&record(Ok(())));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["passed"], true);
        assert_eq!(json["scenario"], "plain");
        assert!(json.get("error").is_none());
        assert_eq!(json["phases"][0]["phase"], "init");
        assert_eq!(json["phases"][0]["elapsed"], 1.5);
    }

    #[test]
    fn failing_report_names_phase_and_error() {
        let report = RunReport::from_record(&record(Err(Error::command_failed("juju down"))));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["failed_phase"], "settled");
        assert_eq!(json["error"], "command failed: juju down");
    }

    #[test]
    fn report_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        RunReport::from_record(&record(Ok(()))).write(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"run_id\": \"0a1b2c\""));
    }
}
