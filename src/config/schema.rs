use crate::fixer::dummy::DEFAULT_SUFFIX;
use crate::schema::ProviderAddr;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Contents of a `terrafix.toml` run file. Every field can be overridden
/// from the command line.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct RunConfig {
    /// Provider address, e.g. `hashicorp/azurerm`.
    #[serde(default)]
    pub provider: Option<String>,
    /// Output of `terraform providers schema -json`.
    #[serde(default)]
    pub provider_schema: Option<PathBuf>,
    /// Output of `terraform show -json`.
    #[serde(default)]
    pub state: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub fixer: FixerConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FixerConfig {
    Dummy {
        #[serde(default = "default_suffix")]
        suffix: String,
        /// Attribute line appended to each definition, e.g. `fixed = true`.
        #[serde(default)]
        attribute: Option<String>,
    },
    Command {
        command: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

impl Default for FixerConfig {
    fn default() -> Self {
        FixerConfig::Dummy {
            suffix: default_suffix(),
            attribute: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if let Some(provider) = &self.provider {
            if let Err(error) = provider.parse::<ProviderAddr>() {
                issues.push(ValidationIssue::InvalidValue {
                    field: "provider",
                    message: error.to_string(),
                });
            }
        }
        if self
            .provider_schema
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            issues.push(ValidationIssue::MissingField {
                field: "provider_schema",
            });
        }
        if self.state.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            issues.push(ValidationIssue::MissingField { field: "state" });
        }

        match &self.fixer {
            FixerConfig::Dummy { attribute, .. } => {
                if let Some(attribute) = attribute {
                    let valid = attribute
                        .split_once('=')
                        .is_some_and(|(name, _)| !name.trim().is_empty());
                    if !valid || attribute.contains('\n') {
                        issues.push(ValidationIssue::InvalidValue {
                            field: "fixer.attribute",
                            message: format!("expected a single `name = value` line, got '{attribute}'"),
                        });
                    }
                }
            }
            FixerConfig::Command { command, .. } => {
                if command.as_os_str().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        field: "fixer.command",
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// The provider under fix: the configured address, or one deduced from
    /// the command fixer's executable name.
    pub fn provider_addr(&self) -> Option<ProviderAddr> {
        if let Some(provider) = &self.provider {
            return provider.parse().ok();
        }
        match &self.fixer {
            FixerConfig::Command { command, .. } => ProviderAddr::from_executable(command),
            FixerConfig::Dummy { .. } => None,
        }
    }
}

/// Every problem found in a run file, one per line.
#[derive(Error, Debug, Clone)]
#[error("{}", display_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn display_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}
