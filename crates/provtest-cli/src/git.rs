//! Git operations for the CLI

use std::path::Path;

use git2::Repository;
use provtest_common::process::{self, CommandSpec};
use tracing::info;

use crate::{Error, Result};

/// Shallow-clone `url` at `reference` (branch or tag) into `dest`.
///
/// `dest` must not exist yet. Goes through the git executable so that tags
/// and branches resolve the same way `git clone --branch` resolves them.
pub async fn shallow_clone(git: &str, url: &str, reference: &str, dest: &Path) -> Result<()> {
    info!(url, reference, dest = %dest.display(), "Cloning provider source");
    let spec = CommandSpec::new(git)
        .args(["clone", "--depth", "1", "--branch", reference, "--", url])
        .arg(dest.to_string_lossy());
    process::run(&spec).await.map_err(|e| Error::CloneFailed {
        url: url.to_string(),
        reference: reference.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Commit id checked out in the repository at `path`
pub fn head_commit(path: &Path) -> Result<String> {
    let repo = Repository::open(path)?;
    let commit = repo.head()?.peel_to_commit()?;
    Ok(commit.id().to_string())
}
