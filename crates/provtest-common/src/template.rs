//! Generated provisioner configuration
//!
//! Two small files are rendered with minijinja:
//! - the version pin (`versions.tf`), which fixes the provider version the
//!   first apply installs from the registry
//! - the CLI override configuration, which points the provisioner at a
//!   locally built provider binary and leaves every other provider to the
//!   registry
//!
//! Values are checked against a conservative character set before being
//! substituted, since they land unescaped inside quoted configuration strings.

use std::fmt;
use std::io::Write;
use std::path::Path;

use minijinja::{context, Environment};

use crate::{Error, Result};

/// Longest accepted version or ref string
const MAX_VALUE_LEN: usize = 128;

const VERSION_PIN_TEMPLATE: &str = r#"terraform {
  required_providers {
    {{ name }} = {
      source  = "{{ namespace }}/{{ name }}"
      version = "{{ version }}"
    }
  }
}
"#;

const OVERRIDE_TEMPLATE: &str = r#"provider_installation {
  dev_overrides {
    "{{ namespace }}/{{ name }}" = "{{ bin_dir }}"
  }

  # Every other provider installs from its registry as usual.
  direct {}
}
"#;

/// Registry address of a provider (`<namespace>/<name>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAddress {
    namespace: String,
    name: String,
}

impl ProviderAddress {
    /// Build a validated provider address
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        for (kind, value) in [("provider namespace", &namespace), ("provider name", &name)] {
            if value.is_empty() {
                return Err(Error::invalid_value(kind, value.as_str(), "must not be empty"));
            }
            if !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(Error::invalid_value(
                    kind,
                    value.as_str(),
                    "must contain only letters, digits, '-' and '_'",
                ));
            }
        }
        Ok(Self { namespace, name })
    }

    /// Provider namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Provider name (also the local name used in `required_providers`)
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ProviderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Check a version or git ref before it is templated or passed to a tool.
///
/// Accepts `[A-Za-z0-9._+/-]`, rejects empty values, a leading `-` (would
/// read as a flag), `..` sequences and anything longer than 128 characters.
pub fn validate_reference(kind: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_value(kind, value, "must not be empty"));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::invalid_value(kind, value, "is too long"));
    }
    if value.starts_with('-') {
        return Err(Error::invalid_value(kind, value, "must not start with '-'"));
    }
    if value.contains("..") {
        return Err(Error::invalid_value(kind, value, "must not contain '..'"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '/' | '-'))
    {
        return Err(Error::invalid_value(
            kind,
            value,
            "contains a disallowed character",
        ));
    }
    Ok(())
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env
}

/// Render the version pin for `provider` at `version`
pub fn render_version_pin(provider: &ProviderAddress, version: &str) -> Result<String> {
    validate_reference("version", version)?;
    Ok(environment().render_str(
        VERSION_PIN_TEMPLATE,
        context! {
            namespace => provider.namespace(),
            name => provider.name(),
            version => version,
        },
    )?)
}

/// Render the CLI override configuration routing `provider` to `bin_dir`
pub fn render_override_config(provider: &ProviderAddress, bin_dir: &Path) -> Result<String> {
    let bin_dir = bin_dir
        .to_str()
        .ok_or_else(|| Error::invalid_value("binary directory", bin_dir.display().to_string(), "is not valid UTF-8"))?;
    if bin_dir.is_empty() {
        return Err(Error::invalid_value("binary directory", bin_dir, "must not be empty"));
    }
    if bin_dir.contains(['"', '\\', '\n', '\r', '$']) {
        return Err(Error::invalid_value(
            "binary directory",
            bin_dir,
            "contains a character that would need escaping",
        ));
    }
    Ok(environment().render_str(
        OVERRIDE_TEMPLATE,
        context! {
            namespace => provider.namespace(),
            name => provider.name(),
            bin_dir => bin_dir,
        },
    )?)
}

/// Write the version pin to `path`, replacing any existing content
pub fn write_version_pin(path: &Path, provider: &ProviderAddress, version: &str) -> Result<()> {
    let rendered = render_version_pin(provider, version)?;
    std::fs::write(path, rendered).map_err(|e| Error::io(path, e))
}

/// Write the override configuration to `path`; fails if the file already exists
pub fn write_override_config(path: &Path, provider: &ProviderAddress, bin_dir: &Path) -> Result<()> {
    let rendered = render_override_config(provider, bin_dir)?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| Error::io(path, e))
}
