//! provtest CLI library
//!
//! Lifecycle harness for the Juju Terraform provider: deploys a Terraform
//! configuration, waits for the model to settle, optionally swaps in a
//! provider built from source and re-applies, then destroys, checking the
//! provisioner's summary at every step.

pub mod commands;
pub mod config;
pub mod error;
pub mod git;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// provtest - deploy/upgrade/destroy lifecycle tests for the Juju provider
#[derive(Parser, Debug)]
#[command(name = "provtest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a lifecycle scenario against a live model
    Run(commands::run::RunArgs),
    /// Check saved provisioner output
    Verify(commands::verify::VerifyArgs),
    /// Build the provider from source and write an override config
    BuildProvider(commands::build_provider::BuildProviderArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args).await,
            Commands::Verify(args) => commands::verify::run(args).await,
            Commands::BuildProvider(args) => commands::build_provider::run(args).await,
        }
    }
}
