//! Common building blocks for provtest: external command execution, retry
//! policies, provisioner summary verification and generated configuration.

#![deny(missing_docs)]

pub mod error;
pub mod process;
pub mod retry;
pub mod summary;
pub mod telemetry;
pub mod template;

pub use error::Error;
pub use summary::{verify, ApplySummary, SummaryKind, VerificationError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Provider namespace used in the registry address (`<namespace>/<name>`)
pub const DEFAULT_PROVIDER_NAMESPACE: &str = "juju";

/// Provider name used in the registry address (`<namespace>/<name>`)
pub const DEFAULT_PROVIDER_NAME: &str = "juju";

/// Registry host the provisioner resolves providers from by default
pub const DEFAULT_REGISTRY_HOST: &str = "registry.terraform.io";

/// Environment variable the provisioner reads its CLI configuration path from
pub const CLI_CONFIG_FILE_ENV: &str = "TF_CLI_CONFIG_FILE";

/// Dependency lock file written by `terraform init`
pub const LOCK_FILE_NAME: &str = ".terraform.lock.hcl";

/// Hidden per-directory provider cache written by `terraform init`
pub const CACHE_DIR_NAME: &str = ".terraform";

/// Local state file persisted by `terraform apply`
pub const STATE_FILE_NAME: &str = "terraform.tfstate";

/// Configuration file that pins the provider version
pub const VERSIONS_FILE_NAME: &str = "versions.tf";
