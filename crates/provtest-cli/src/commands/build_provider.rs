//! Build-provider command - build the provider from source without a run
//!
//! Usage: provtest build-provider --ref <ref> [--build-dir <dir>]
//!
//! Leaves the build directory in place and prints the override config path,
//! ready for `TF_CLI_CONFIG_FILE`.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use provtest_common::CLI_CONFIG_FILE_ENV;

use super::generate_run_id;
use super::upgrade::{SourceBuilder, UpgradeBuilder};
use crate::config::HarnessConfig;
use crate::{Error, Result};

/// Build the provider at a git ref and write an override config
#[derive(Args, Debug)]
pub struct BuildProviderArgs {
    /// Git ref (branch or tag) to build
    #[arg(long = "ref", env = "PROVTEST_UPGRADE_REF")]
    pub reference: Option<String>,

    /// Substituted for `{baseline_version}` in build steps
    #[arg(long, env = "PROVTEST_BASELINE_VERSION")]
    pub baseline_version: Option<String>,

    /// Directory to build in (must not exist or be empty)
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Harness configuration file (YAML)
    #[arg(short = 'c', long, env = "PROVTEST_CONFIG")]
    pub config: Option<PathBuf>,
}

pub async fn run(args: BuildProviderArgs) -> Result<()> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;
    if let Some(reference) = &args.reference {
        config.upgrade_ref = reference.clone();
    }
    if let Some(version) = &args.baseline_version {
        config.baseline_version = Some(version.clone());
    }
    config.validate()?;

    let build_dir = args.build_dir.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("provtest-build-{}", generate_run_id()))
    });
    ensure_empty_dir(&build_dir)?;

    let builder = SourceBuilder::from_config(&config)?;
    let artifact = builder
        .build(config.upgrade_baseline(), &config.upgrade_ref, &build_dir)
        .await?;

    info!(
        build_dir = %artifact.build_dir.display(),
        commit = artifact.commit.as_deref().unwrap_or("unknown"),
        "Provider build ready"
    );
    println!(
        "export {}={}",
        CLI_CONFIG_FILE_ENV,
        artifact.override_config.display()
    );
    Ok(())
}

fn ensure_empty_dir(dir: &std::path::Path) -> Result<()> {
    if dir.exists() {
        let mut entries = std::fs::read_dir(dir)?;
        if entries.next().is_some() {
            return Err(Error::validation(format!(
                "build directory {} is not empty",
                dir.display()
            )));
        }
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}
