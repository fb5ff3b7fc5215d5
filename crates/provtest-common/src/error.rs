//! Error types for provtest primitives
//!
//! Every variant carries enough context (command line, counts, offending
//! value) to be printed directly as the failure message of a run.

use std::time::Duration;

use thiserror::Error;

use crate::summary::VerificationError;

/// Main error type for shared provtest operations
#[derive(Debug, Error)]
pub enum Error {
    /// An external command exited with a non-zero status
    #[error("command `{command}` failed (exit code {}): {message}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Tail of the captured error output
        message: String,
    },

    /// An external command could not be started or awaited
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// An external command exceeded its configured timeout
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout {
        /// Rendered command line
        command: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// Provisioner output failed verification
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// A value rejected before being templated into generated configuration
    #[error("invalid {kind} '{value}': {reason}")]
    InvalidValue {
        /// What the value is (e.g. "version", "ref")
        kind: &'static str,
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// A retryable-error pattern is not a valid regular expression
    #[error("invalid retryable error pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Filesystem error
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an IO error bound to a path
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create an invalid-value error
    pub fn invalid_value(kind: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidValue {
            kind,
            value: value.into(),
            reason,
        }
    }
}
