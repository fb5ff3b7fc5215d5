//! Provisioner driver
//!
//! Wraps the three provisioning operations the lifecycle needs. Every
//! invocation tees its output to the console and hands the captured text back
//! to the caller for verification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use provtest_common::process::{CommandSpec, OutputMode};
use provtest_common::retry::{run_with_retry, RetryPolicy};
use provtest_common::CLI_CONFIG_FILE_ENV;

use crate::Result;

/// Per-phase provisioning options.
///
/// An immutable value: a phase that needs different settings builds a new
/// one with [`ProvisionOptions::with_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl ProvisionOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
        }
    }

    /// Copy of these options with one more environment override
    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.env.insert(key.into(), value.into());
        next
    }

    /// Copy of these options pointing the provisioner at an override config
    pub fn with_override_config(&self, path: &Path) -> Self {
        self.with_env(CLI_CONFIG_FILE_ENV, path.to_string_lossy())
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Override config in effect, if any
    pub fn override_config(&self) -> Option<&str> {
        self.env.get(CLI_CONFIG_FILE_ENV).map(String::as_str)
    }
}

/// Trait for driving the provisioner
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Initialise then apply; returns the apply output
    async fn init_and_apply(&self, options: &ProvisionOptions) -> Result<String>;

    /// Destroy everything; returns the destroy output
    async fn destroy(&self, options: &ProvisionOptions) -> Result<String>;

    /// Initialise only, to re-prime local state before cleanup
    async fn init_only(&self, options: &ProvisionOptions) -> Result<()>;
}

/// Terraform CLI driver
pub struct TerraformDriver {
    binary: String,
    retry: RetryPolicy,
}

impl TerraformDriver {
    pub fn new(binary: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            binary: binary.into(),
            retry,
        }
    }

    fn command(&self, options: &ProvisionOptions, args: &[&str]) -> CommandSpec {
        CommandSpec::new(&self.binary)
            .args(args.iter().copied())
            .current_dir(options.working_dir())
            .envs(options.env())
            .output(OutputMode::Tee)
    }

    async fn invoke(&self, options: &ProvisionOptions, args: &[&str]) -> Result<String> {
        let spec = self.command(options, args);
        debug!(command = %spec, dir = %options.working_dir().display(), "Running provisioner");
        let start = Instant::now();
        let output = run_with_retry(&self.retry, &spec).await?;
        info!(command = %spec, elapsed = ?start.elapsed(), "Provisioner command finished");
        Ok(output.combined())
    }
}

const INIT_ARGS: &[&str] = &["init", "-input=false", "-no-color"];
const APPLY_ARGS: &[&str] = &["apply", "-input=false", "-auto-approve", "-no-color"];
const DESTROY_ARGS: &[&str] = &["destroy", "-auto-approve", "-input=false", "-no-color"];

#[async_trait]
impl Provisioner for TerraformDriver {
    async fn init_and_apply(&self, options: &ProvisionOptions) -> Result<String> {
        self.invoke(options, INIT_ARGS).await?;
        self.invoke(options, APPLY_ARGS).await
    }

    async fn destroy(&self, options: &ProvisionOptions) -> Result<String> {
        self.invoke(options, DESTROY_ARGS).await
    }

    async fn init_only(&self, options: &ProvisionOptions) -> Result<()> {
        self.invoke(options, INIT_ARGS).await.map(|_| ())
    }
}
