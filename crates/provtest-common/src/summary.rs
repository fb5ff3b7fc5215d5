//! Provisioner summary parsing and verification
//!
//! After `apply` and `destroy` the provisioner prints a one-line summary:
//!
//! ```text
//! Apply complete! Resources: 2 added, 0 changed, 0 destroyed.
//! Destroy complete! Resources: 2 destroyed.
//! ```
//!
//! [`verify`] finds the first such line in the captured output and checks
//! the counts against what the phase expects:
//!
//! | Phase   | added | changed | destroyed |
//! |---------|-------|---------|-----------|
//! | Apply   | ≥ 1   | 0       | 0         |
//! | ReApply | 0     | 0       | 0         |
//! | Destroy | –     | –       | ≥ 1       |
//!
//! A missing summary line almost always means the provisioner ran under a
//! non-English locale: genuine failures are already caught by its exit code.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use thiserror::Error;

static APPLY_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Apply complete! Resources: ([0-9]+) added, ([0-9]+) changed, ([0-9]+) destroyed\.$")
        .expect("apply summary pattern is hardcoded and valid")
});

static DESTROY_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Destroy complete! Resources: ([0-9]+) destroyed\.$")
        .expect("destroy summary pattern is hardcoded and valid")
});

/// Which provisioning phase produced the output being verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryKind {
    /// First apply against an empty model
    Apply,
    /// Apply after swapping the provider binary; must be a no-op
    ReApply,
    /// Destroy of everything applied
    Destroy,
}

impl SummaryKind {
    fn pattern(self) -> &'static Regex {
        match self {
            SummaryKind::Apply | SummaryKind::ReApply => &APPLY_SUMMARY,
            SummaryKind::Destroy => &DESTROY_SUMMARY,
        }
    }
}

impl fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryKind::Apply => write!(f, "apply"),
            SummaryKind::ReApply => write!(f, "re-apply"),
            SummaryKind::Destroy => write!(f, "destroy"),
        }
    }
}

impl FromStr for SummaryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apply" => Ok(SummaryKind::Apply),
            "reapply" | "re-apply" => Ok(SummaryKind::ReApply),
            "destroy" => Ok(SummaryKind::Destroy),
            other => Err(format!(
                "unknown summary kind '{other}', expected apply, reapply or destroy"
            )),
        }
    }
}

/// Resource counts reported by a provisioner summary line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    /// Resources created
    pub added: u64,
    /// Resources updated in place
    pub changed: u64,
    /// Resources deleted
    pub destroyed: u64,
    /// Whether a summary line was found at all
    pub recognized: bool,
}

impl ApplySummary {
    /// Parse the first summary line for `kind` out of `text`.
    ///
    /// Returns an unrecognized summary when no line matches. Later matching
    /// lines are ignored.
    pub fn parse(kind: SummaryKind, text: &str) -> Result<Self, VerificationError> {
        let pattern = kind.pattern();
        let Some(caps) = text.lines().find_map(|line| pattern.captures(line)) else {
            return Ok(Self::default());
        };

        match kind {
            SummaryKind::Apply | SummaryKind::ReApply => Ok(Self {
                added: count(kind, &caps, 1, "added")?,
                changed: count(kind, &caps, 2, "changed")?,
                destroyed: count(kind, &caps, 3, "destroyed")?,
                recognized: true,
            }),
            SummaryKind::Destroy => Ok(Self {
                added: 0,
                changed: 0,
                destroyed: count(kind, &caps, 1, "destroyed")?,
                recognized: true,
            }),
        }
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.recognized {
            return write!(f, "no summary");
        }
        write!(
            f,
            "{} added, {} changed, {} destroyed",
            self.added, self.changed, self.destroyed
        )
    }
}

fn count(
    kind: SummaryKind,
    caps: &Captures<'_>,
    group: usize,
    field: &'static str,
) -> Result<u64, VerificationError> {
    let raw = caps.get(group).map_or("", |m| m.as_str());
    raw.parse().map_err(|_| VerificationError::InvalidCount {
        kind,
        field,
        value: raw.to_string(),
    })
}

/// Why provisioner output failed verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// No summary line found; most likely a non-English locale
    #[error("did not find the expected {kind} summary line; run the provisioner under the \"C\" locale")]
    SummaryNotRecognized {
        /// Phase being verified
        kind: SummaryKind,
    },

    /// Apply created nothing
    #[error("zero \"added\" count on apply")]
    ZeroAdded,

    /// Re-apply created resources
    #[error("non-zero \"added\" count on {kind}: {count} added, expected 0")]
    UnexpectedAddition {
        /// Phase being verified
        kind: SummaryKind,
        /// Observed count
        count: u64,
    },

    /// Apply or re-apply changed resources in place
    #[error("non-zero \"changed\" count on {kind}: {count} changed, expected 0")]
    UnexpectedChange {
        /// Phase being verified
        kind: SummaryKind,
        /// Observed count
        count: u64,
    },

    /// Apply or re-apply destroyed resources
    #[error("non-zero \"destroyed\" count on {kind}: {count} destroyed, expected 0")]
    UnexpectedDestruction {
        /// Phase being verified
        kind: SummaryKind,
        /// Observed count
        count: u64,
    },

    /// Destroy removed nothing
    #[error("zero \"destroyed\" count on destroy")]
    ZeroDestroyed,

    /// A count did not fit in 64 bits
    #[error("unparseable \"{field}\" count '{value}' in {kind} summary")]
    InvalidCount {
        /// Phase being verified
        kind: SummaryKind,
        /// Which count
        field: &'static str,
        /// The raw digits
        value: String,
    },
}

/// Verify provisioner output for the given phase.
///
/// On success returns the parsed summary for logging.
pub fn verify(kind: SummaryKind, text: &str) -> Result<ApplySummary, VerificationError> {
    let summary = ApplySummary::parse(kind, text)?;
    if !summary.recognized {
        return Err(VerificationError::SummaryNotRecognized { kind });
    }

    match kind {
        SummaryKind::Apply => {
            if summary.added == 0 {
                return Err(VerificationError::ZeroAdded);
            }
            reject_changes(kind, &summary)?;
        }
        SummaryKind::ReApply => {
            if summary.added > 0 {
                return Err(VerificationError::UnexpectedAddition {
                    kind,
                    count: summary.added,
                });
            }
            reject_changes(kind, &summary)?;
        }
        SummaryKind::Destroy => {
            if summary.destroyed == 0 {
                return Err(VerificationError::ZeroDestroyed);
            }
        }
    }

    Ok(summary)
}

fn reject_changes(kind: SummaryKind, summary: &ApplySummary) -> Result<(), VerificationError> {
    if summary.changed > 0 {
        return Err(VerificationError::UnexpectedChange {
            kind,
            count: summary.changed,
        });
    }
    if summary.destroyed > 0 {
        return Err(VerificationError::UnexpectedDestruction {
            kind,
            count: summary.destroyed,
        });
    }
    Ok(())
}
