//! Error types for the CLI

use std::path::PathBuf;

use provtest_common::VerificationError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Harness(#[from] provtest_common::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model '{model}' did not settle ({condition}): {message}")]
    SettleTimeout {
        model: String,
        condition: String,
        message: String,
    },

    #[error("did not find prerequisite executable: {name}")]
    MissingPrerequisite { name: String },

    #[error("failed to clone {url} at '{reference}': {message}")]
    CloneFailed {
        url: String,
        reference: String,
        message: String,
    },

    #[error("build step `{step}` failed: {message}")]
    BuildStepFailed { step: String, message: String },

    #[error("failed to read config {path}: {message}")]
    ConfigLoad { path: PathBuf, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl From<VerificationError> for Error {
    fn from(err: VerificationError) -> Self {
        Error::Harness(err.into())
    }
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// The verification failure behind this error, if any
    pub fn verification(&self) -> Option<&VerificationError> {
        match self {
            Error::Harness(provtest_common::Error::Verification(v)) => Some(v),
            _ => None,
        }
    }
}
