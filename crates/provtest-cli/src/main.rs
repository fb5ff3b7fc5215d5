//! provtest CLI
//!
//! Lifecycle tests for the Juju Terraform provider.

use clap::Parser;

use provtest_cli::commands::CommandErrorExt;
use provtest_cli::{Cli, Result};
use provtest_common::telemetry::{init_logging, DEFAULT_LOG_DIRECTIVE};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(DEFAULT_LOG_DIRECTIVE).cmd_err()?;

    let cli = Cli::parse();
    cli.run().await
}
