//! CLI commands

use std::fmt::Display;

use crate::{Error, Result};

pub mod build_provider;
pub mod lifecycle;
pub mod provisioner;
pub mod report;
pub mod run;
pub mod settle;
pub mod upgrade;
pub mod verify;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Generate a short readable run ID (6 hex chars).
///
/// Names the per-run build directory so parallel runs don't collide.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32;
    let pid = std::process::id();
    format!("{:06x}", (timestamp ^ pid) & 0xFFFFFF)
}
