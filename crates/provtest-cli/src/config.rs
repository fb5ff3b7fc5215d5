//! Harness configuration.
//!
//! Every field has a default, so an empty (or absent) YAML file describes the
//! standard run: the Terraform configuration in the current directory, the
//! `juju/juju` provider, and the Juju model `main`.
//!
//! ```yaml
//! working_dir: ./deploy
//! baseline_version: "0.22.0"
//! upgrade_ref: v1.0.0-beta2
//! model: main
//! settle_timeout: 30m
//! retry:
//!   max_retries: 3
//!   delay_secs: 5
//! ```
//!
//! Command-line flags (and their `PROVTEST_*` environment variables) take
//! precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use provtest_common::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use provtest_common::template::{validate_reference, ProviderAddress};
use provtest_common::{
    DEFAULT_PROVIDER_NAME, DEFAULT_PROVIDER_NAMESPACE, DEFAULT_REGISTRY_HOST, VERSIONS_FILE_NAME,
};

use crate::{Error, Result};

/// Provider version the upgrade scenario deploys first
pub const DEFAULT_BASELINE_VERSION: &str = "0.22.0";

/// Source ref the upgrade scenario builds and switches to
pub const DEFAULT_UPGRADE_REF: &str = "v1.0.0-beta2";

/// Juju model the deployment lands in
pub const DEFAULT_MODEL: &str = "main";

/// Upstream provider repository
pub const DEFAULT_PROVIDER_REPOSITORY: &str = "https://github.com/juju/terraform-provider-juju.git";

/// Full harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Directory holding the Terraform configuration under test
    pub working_dir: PathBuf,
    /// Version-pin file name, relative to `working_dir`
    pub versions_file: String,
    /// Provider under test
    pub provider: ProviderConfig,
    /// Version pinned before the first apply. The plain scenario leaves the
    /// pin file alone when unset; the upgrade scenario falls back to
    /// [`DEFAULT_BASELINE_VERSION`].
    pub baseline_version: Option<String>,
    /// Git ref built for the upgrade scenario
    pub upgrade_ref: String,
    /// Juju model to wait on
    pub model: String,
    /// Passed to `juju wait-for --timeout` when set (e.g. "30m")
    pub settle_timeout: Option<String>,
    /// Executable names
    pub tools: ToolsConfig,
    /// Executables that must resolve on PATH before building from source
    pub required_executables: Vec<String>,
    /// Build steps run in the cloned source, in order.
    /// `{baseline_version}` in an argument is replaced with the baseline.
    pub build_steps: Vec<Vec<String>>,
    /// Retry of recognized transient provisioner failures
    pub retry: RetrySettings,
    /// Per-user provider plugin directory purged after an upgrade run.
    /// Defaults to `~/.terraform.d/plugins/<registry>/<namespace>/<name>`.
    pub plugin_cache_dir: Option<PathBuf>,
}

/// Provider identity and source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub namespace: String,
    pub name: String,
    pub repository: String,
}

/// External tool names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub terraform: String,
    pub juju: String,
    pub git: String,
    pub go: String,
}

/// Transient-error retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Use the built-in transient-error table
    pub use_defaults: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Seconds between attempts
    pub delay_secs: u64,
    /// Extra regular expressions treated as transient
    pub extra_patterns: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            versions_file: VERSIONS_FILE_NAME.to_string(),
            provider: ProviderConfig::default(),
            baseline_version: None,
            upgrade_ref: DEFAULT_UPGRADE_REF.to_string(),
            model: DEFAULT_MODEL.to_string(),
            settle_timeout: None,
            tools: ToolsConfig::default(),
            required_executables: ["git", "make", "yq", "go"]
                .into_iter()
                .map(String::from)
                .collect(),
            build_steps: vec![
                vec!["make".to_string(), "install-dependencies".to_string()],
                vec!["make".to_string(), "go-install".to_string()],
            ],
            retry: RetrySettings::default(),
            plugin_cache_dir: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_PROVIDER_NAMESPACE.to_string(),
            name: DEFAULT_PROVIDER_NAME.to_string(),
            repository: DEFAULT_PROVIDER_REPOSITORY.to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            terraform: "terraform".to_string(),
            juju: "juju".to_string(),
            git: "git".to_string(),
            go: "go".to_string(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            use_defaults: true,
            max_retries: DEFAULT_MAX_RETRIES,
            delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
            extra_patterns: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Load from a YAML file, or defaults when `path` is None
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&data).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parse from YAML text; an empty document yields defaults
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Check everything that ends up templated or passed to external tools
    pub fn validate(&self) -> Result<()> {
        self.provider_address()?;
        if let Some(version) = &self.baseline_version {
            validate_reference("baseline version", version)?;
        }
        validate_reference("upgrade ref", &self.upgrade_ref)?;
        if self.model.trim().is_empty() {
            return Err(Error::validation("model name must not be empty"));
        }
        if self.versions_file.is_empty() || self.versions_file.contains('/') {
            return Err(Error::validation(format!(
                "versions_file must be a plain file name, got '{}'",
                self.versions_file
            )));
        }
        if let Some((i, _)) = self
            .build_steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.is_empty())
        {
            return Err(Error::validation(format!("build step {} is empty", i + 1)));
        }
        if self.provider.repository.trim().is_empty() {
            return Err(Error::validation("provider repository must not be empty"));
        }
        Ok(())
    }

    /// Registry address of the provider under test
    pub fn provider_address(&self) -> Result<ProviderAddress> {
        Ok(ProviderAddress::new(
            self.provider.namespace.as_str(),
            self.provider.name.as_str(),
        )?)
    }

    /// Absolute-or-relative path of the version-pin file
    pub fn versions_path(&self) -> PathBuf {
        self.working_dir.join(&self.versions_file)
    }

    /// Baseline for the upgrade scenario
    pub fn upgrade_baseline(&self) -> &str {
        self.baseline_version
            .as_deref()
            .unwrap_or(DEFAULT_BASELINE_VERSION)
    }

    /// Retry policy handed to the provisioner driver
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let mut policy = RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_secs(self.retry.delay_secs),
        );
        if self.retry.use_defaults {
            policy = policy.with_default_patterns()?;
        }
        for pattern in &self.retry.extra_patterns {
            policy = policy.with_pattern(pattern, "configured transient error")?;
        }
        Ok(policy)
    }

    /// Per-user plugin directory purged after an upgrade run
    pub fn plugin_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.plugin_cache_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::command_failed("could not determine home directory"))?;
        Ok(home
            .join(".terraform.d")
            .join("plugins")
            .join(DEFAULT_REGISTRY_HOST)
            .join(&self.provider.namespace)
            .join(&self.provider.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provtest_common::retry::DEFAULT_RETRYABLE_ERRORS;

    #[test]
    fn empty_yaml_is_default() {
        let config = HarnessConfig::from_yaml("  \n").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = HarnessConfig::from_yaml(
            "working_dir: /srv/deploy\nbaseline_version: \"0.21.1\"\nretry:\n  max_retries: 1\n",
        )
        .unwrap();
        assert_eq!(config.working_dir, PathBuf::from("/srv/deploy"));
        assert_eq!(config.baseline_version.as_deref(), Some("0.21.1"));
        assert_eq!(config.retry.max_retries, 1);
        assert!(config.retry.use_defaults);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.versions_path(), PathBuf::from("/srv/deploy/versions.tf"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(HarnessConfig::from_yaml("modle: main\n").is_err());
    }

    #[test]
    fn validate_rejects_unsafe_values() {
        let config = HarnessConfig {
            baseline_version: Some("1.0\"\n}".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HarnessConfig {
            upgrade_ref: "--upload-pack=x".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HarnessConfig {
            build_steps: vec![vec![]],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HarnessConfig {
            versions_file: "../versions.tf".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn upgrade_baseline_falls_back() {
        let config = HarnessConfig::default();
        assert_eq!(config.upgrade_baseline(), DEFAULT_BASELINE_VERSION);
        let config = HarnessConfig {
            baseline_version: Some("0.20.0".to_string()),
            ..Default::default()
        };
        assert_eq!(config.upgrade_baseline(), "0.20.0");
    }

    #[test]
    fn retry_policy_from_settings() {
        let config = HarnessConfig::default();
        let policy = config.retry_policy().unwrap();
        assert_eq!(
            policy.pattern_count(),
            DEFAULT_RETRYABLE_ERRORS.len()
        );
        assert_eq!(policy.delay(), Duration::from_secs(5));

        let config = HarnessConfig {
            retry: RetrySettings {
                use_defaults: false,
                max_retries: 0,
                delay_secs: 0,
                extra_patterns: vec!["Error acquiring the state lock".to_string()],
            },
            ..Default::default()
        };
        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.pattern_count(), 1);
        assert_eq!(policy.max_retries(), 0);
    }

    #[test]
    fn explicit_plugin_cache_dir_wins() {
        let config = HarnessConfig {
            plugin_cache_dir: Some(PathBuf::from("/tmp/plugins")),
            ..Default::default()
        };
        assert_eq!(config.plugin_cache_dir().unwrap(), PathBuf::from("/tmp/plugins"));
    }

    #[test]
    fn default_plugin_cache_dir_layout() {
        if let Ok(dir) = HarnessConfig::default().plugin_cache_dir() {
            assert!(dir.ends_with(".terraform.d/plugins/registry.terraform.io/juju/juju"));
        }
    }
}
