//! Upgrade builder
//!
//! Builds the provider from source at a target ref and writes a CLI
//! configuration that points the provisioner at the freshly installed binary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use provtest_common::process::{self, CommandSpec, OutputMode};
use provtest_common::template::{self, ProviderAddress};

use crate::config::HarnessConfig;
use crate::git;
use crate::{Error, Result};

/// Name of the override configuration written into the build directory
pub const OVERRIDE_FILE_NAME: &str = "provider-override.tfrc";

/// Placeholder in build step arguments replaced with the baseline version
pub const BASELINE_PLACEHOLDER: &str = "{baseline_version}";

/// Output of a successful upgrade build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeArtifact {
    /// Directory owning everything the build produced
    pub build_dir: PathBuf,
    /// Checked-out provider source
    pub source_dir: PathBuf,
    /// Directory the toolchain installed the provider binary into
    pub bin_dir: PathBuf,
    /// Generated provisioner CLI configuration
    pub override_config: PathBuf,
    /// Commit that was built, when it could be read
    pub commit: Option<String>,
}

/// Trait for building the provider from source
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpgradeBuilder: Send + Sync {
    /// Build `target_ref` into `build_dir`.
    ///
    /// Fail-fast with no rollback; the caller owns `build_dir`.
    async fn build(
        &self,
        baseline_version: &str,
        target_ref: &str,
        build_dir: &Path,
    ) -> Result<UpgradeArtifact>;
}

/// Builds from a git checkout with the configured build steps
pub struct SourceBuilder {
    git: String,
    go: String,
    repository: String,
    provider: ProviderAddress,
    required_executables: Vec<String>,
    build_steps: Vec<Vec<String>>,
}

impl SourceBuilder {
    pub fn new(provider: ProviderAddress, repository: impl Into<String>) -> Self {
        Self {
            git: "git".to_string(),
            go: "go".to_string(),
            repository: repository.into(),
            provider,
            required_executables: Vec::new(),
            build_steps: Vec::new(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        Ok(Self::new(config.provider_address()?, config.provider.repository.as_str())
            .with_tools(config.tools.git.as_str(), config.tools.go.as_str())
            .with_required_executables(config.required_executables.clone())
            .with_build_steps(config.build_steps.clone()))
    }

    pub fn with_tools(mut self, git: impl Into<String>, go: impl Into<String>) -> Self {
        self.git = git.into();
        self.go = go.into();
        self
    }

    pub fn with_required_executables(mut self, names: Vec<String>) -> Self {
        self.required_executables = names;
        self
    }

    pub fn with_build_steps(mut self, steps: Vec<Vec<String>>) -> Self {
        self.build_steps = steps;
        self
    }

    async fn check_prerequisites(&self) -> Result<()> {
        for name in &self.required_executables {
            if !process::executable_exists(name).await? {
                return Err(Error::MissingPrerequisite { name: name.clone() });
            }
        }
        Ok(())
    }

    async fn run_build_steps(&self, source_dir: &Path, baseline_version: &str) -> Result<()> {
        for step in &self.build_steps {
            let spec = build_step_command(step, baseline_version, source_dir)?;
            info!(step = %spec, "Running build step");
            process::run(&spec)
                .await
                .map_err(|e| Error::BuildStepFailed {
                    step: spec.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// `go env GOBIN`, falling back to the first `GOPATH` entry + `/bin`
    async fn resolve_bin_dir(&self, source_dir: &Path) -> Result<PathBuf> {
        let gobin = self.go_env("GOBIN", source_dir).await?;
        if !gobin.is_empty() {
            return Ok(PathBuf::from(gobin));
        }
        let gopath = self.go_env("GOPATH", source_dir).await?;
        let first = gopath.split(':').next().unwrap_or_default();
        if first.is_empty() {
            return Err(Error::command_failed(
                "neither GOBIN nor GOPATH is set in the go environment",
            ));
        }
        Ok(Path::new(first).join("bin"))
    }

    async fn go_env(&self, key: &str, source_dir: &Path) -> Result<String> {
        let spec = CommandSpec::new(&self.go)
            .args(["env", key])
            .current_dir(source_dir)
            .output(OutputMode::Capture);
        let output = process::run(&spec).await?;
        Ok(output.stdout.trim().to_string())
    }
}

/// Command for one build step, with the baseline placeholder substituted
fn build_step_command(step: &[String], baseline_version: &str, dir: &Path) -> Result<CommandSpec> {
    let (program, args) = step
        .split_first()
        .ok_or_else(|| Error::validation("empty build step"))?;
    Ok(CommandSpec::new(program.as_str())
        .args(args.iter().map(|a| a.replace(BASELINE_PLACEHOLDER, baseline_version)))
        .current_dir(dir)
        .output(OutputMode::Tee))
}

#[async_trait]
impl UpgradeBuilder for SourceBuilder {
    async fn build(
        &self,
        baseline_version: &str,
        target_ref: &str,
        build_dir: &Path,
    ) -> Result<UpgradeArtifact> {
        template::validate_reference("baseline version", baseline_version)?;
        template::validate_reference("upgrade ref", target_ref)?;

        self.check_prerequisites().await?;

        let source_dir = build_dir.join("source");
        git::shallow_clone(&self.git, &self.repository, target_ref, &source_dir).await?;
        let commit = match git::head_commit(&source_dir) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(error = %e, "Could not read built commit");
                None
            }
        };

        self.run_build_steps(&source_dir, baseline_version).await?;

        let bin_dir = self.resolve_bin_dir(&source_dir).await?;
        let override_config = build_dir.join(OVERRIDE_FILE_NAME);
        template::write_override_config(&override_config, &self.provider, &bin_dir)?;

        info!(
            target_ref,
            commit = commit.as_deref().unwrap_or("unknown"),
            bin_dir = %bin_dir.display(),
            override_config = %override_config.display(),
            "Provider built from source"
        );

        Ok(UpgradeArtifact {
            build_dir: build_dir.to_path_buf(),
            source_dir,
            bin_dir,
            override_config,
            commit,
        })
    }
}
