//! Settle waiter
//!
//! Blocks until the Juju model reports a converged state. The platform does
//! the polling; this side only interprets the exit status.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use provtest_common::process::{self, CommandSpec, OutputMode};

use crate::{Error, Result};

/// Every unit alive, with an active workload and an idle agent
pub const ACTIVE_UNITS_QUERY: &str = r#"forEach(units, unit => unit.life=="alive" && unit.workload-status=="active" && unit.agent-status=="idle")"#;

/// What the model has to reach before the wait returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleCondition {
    /// All units active and idle (after an apply)
    UnitsActiveIdle,
    /// The model itself reports idle, no unit predicate (after a destroy)
    ModelIdle,
}

impl SettleCondition {
    /// Query predicate passed to `juju wait-for`, if any
    pub fn query(self) -> Option<&'static str> {
        match self {
            SettleCondition::UnitsActiveIdle => Some(ACTIVE_UNITS_QUERY),
            SettleCondition::ModelIdle => None,
        }
    }
}

impl fmt::Display for SettleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettleCondition::UnitsActiveIdle => write!(f, "units active and idle"),
            SettleCondition::ModelIdle => write!(f, "model idle"),
        }
    }
}

/// Trait for waiting on platform convergence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SettleWaiter: Send + Sync {
    /// Block until `condition` holds; returns how long the wait took
    async fn wait_for_settled(&self, condition: SettleCondition) -> Result<Duration>;
}

/// `juju wait-for model` waiter
pub struct JujuWaiter {
    juju: String,
    model: String,
    timeout: Option<String>,
}

impl JujuWaiter {
    pub fn new(juju: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            juju: juju.into(),
            model: model.into(),
            timeout: None,
        }
    }

    /// Pass `--timeout` through to the platform
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    fn command(&self, condition: SettleCondition) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.juju)
            .args(["wait-for", "model", self.model.as_str()])
            .output(OutputMode::Tee);
        if let Some(query) = condition.query() {
            spec = spec.arg(format!("--query={query}"));
        }
        if let Some(timeout) = &self.timeout {
            spec = spec.arg(format!("--timeout={timeout}"));
        }
        spec
    }
}

#[async_trait]
impl SettleWaiter for JujuWaiter {
    async fn wait_for_settled(&self, condition: SettleCondition) -> Result<Duration> {
        let spec = self.command(condition);
        debug!(command = %spec, "Waiting for model to settle");
        let start = Instant::now();
        process::run(&spec).await.map_err(|e| match e {
            provtest_common::Error::CommandFailed { .. } | provtest_common::Error::Timeout { .. } => {
                Error::SettleTimeout {
                    model: self.model.clone(),
                    condition: condition.to_string(),
                    message: e.to_string(),
                }
            }
            other => other.into(),
        })?;
        let elapsed = start.elapsed();
        info!(model = %self.model, %condition, ?elapsed, "Model settled");
        Ok(elapsed)
    }
}
