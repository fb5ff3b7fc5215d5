//! Retry on recognized transient provisioner failures.
//!
//! The provisioner occasionally fails for reasons unrelated to the
//! configuration under test (registry hiccups, plugin start timeouts, reset
//! connections). A [`RetryPolicy`] holds a table of output patterns that mark
//! such failures. A failed invocation is retried only when its captured output
//! matches one of them; any other failure is returned immediately.

use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use crate::process::{self, CommandOutput, CommandSpec};
use crate::{Error, Result};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Transient provisioner errors worth retrying: (pattern, description)
pub const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    (
        r"read: connection reset by peer",
        "Failed to reach a remote repository",
    ),
    (r"transport is closing", "Failed to reach a remote API"),
    (r"TLS handshake timeout", "Transient network error"),
    (
        r"unable to verify signature",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"unable to verify checksum",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"no provider exists with the given name",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"registry service is unreachable",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"Error installing provider",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"Failed to query available provider packages",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"timeout while waiting for plugin to start",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"timed out waiting for server handshake",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"could not query provider registry for",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        r"Provider produced inconsistent result after apply",
        "Provider eventual consistency error",
    ),
];

#[derive(Debug, Clone)]
struct RetryablePattern {
    regex: Regex,
    description: String,
}

/// Which failures to retry, how often, and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    patterns: Vec<RetryablePattern>,
    max_retries: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Empty pattern table with the given retry budget
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            patterns: Vec::new(),
            max_retries,
            delay,
        }
    }

    /// Add every pattern of [`DEFAULT_RETRYABLE_ERRORS`] to the table
    pub fn with_default_patterns(self) -> Result<Self> {
        DEFAULT_RETRYABLE_ERRORS
            .iter()
            .try_fold(self, |policy, (pattern, description)| {
                policy.with_pattern(pattern, *description)
            })
    }

    /// Add a pattern to the table
    pub fn with_pattern(mut self, pattern: &str, description: impl Into<String>) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.patterns.push(RetryablePattern {
            regex,
            description: description.into(),
        });
        Ok(self)
    }

    /// Number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Pause between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of patterns in the table
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Description of the first pattern matching `output`, if any
    pub fn matching(&self, output: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(output))
            .map(|p| p.description.as_str())
    }
}

/// Run `spec`, retrying failures whose output matches `policy`.
///
/// Returns the output of the first successful attempt, or the
/// `CommandFailed` error of the last attempt.
pub async fn run_with_retry(policy: &RetryPolicy, spec: &CommandSpec) -> Result<CommandOutput> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let output = process::run_allow_fail(spec).await?;
        if output.success {
            if attempt > 1 {
                info!(command = %spec, attempt, "Command succeeded after retry");
            }
            return Ok(output);
        }

        if attempt <= policy.max_retries {
            if let Some(reason) = policy.matching(&output.combined()) {
                warn!(
                    command = %spec,
                    attempt,
                    reason,
                    delay = ?policy.delay,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                continue;
            }
        }

        return output.into_result(spec);
    }
}
