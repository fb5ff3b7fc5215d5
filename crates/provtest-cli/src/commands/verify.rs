//! Verify command - check saved provisioner output offline
//!
//! Usage: provtest verify <apply|reapply|destroy> [FILE|-]

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use provtest_common::summary::{self, SummaryKind};

use crate::Result;

/// Check a saved apply or destroy log against the lifecycle rules
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Which rules to apply (apply, reapply, destroy)
    pub kind: SummaryKind,

    /// File holding the provisioner output; `-` or omitted reads stdin
    pub input: Option<PathBuf>,
}

pub async fn run(args: VerifyArgs) -> Result<()> {
    let text = read_input(args.input.as_ref())?;
    let parsed = summary::verify(args.kind, &text)?;
    info!(kind = %args.kind, %parsed, "Provisioner output verified");
    println!("{parsed}");
    Ok(())
}

fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}
