use crate::schema::errors::SchemaError;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_HOSTNAME: &str = "registry.terraform.io";
pub const DEFAULT_NAMESPACE: &str = "hashicorp";
pub const BUILTIN_HOSTNAME: &str = "terraform.io";
pub const BUILTIN_NAMESPACE: &str = "builtin";

const EXECUTABLE_PREFIX: &str = "terraform-provider-";

/// Fully qualified provider address: `hostname/namespace/type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderAddr {
    pub hostname: String,
    pub namespace: String,
    pub name: String,
}

impl ProviderAddr {
    pub fn new(
        hostname: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Provider implied by a bare local name, e.g. `azurerm` for
    /// `azurerm_resource_group`.
    pub fn implied(local_name: &str) -> Self {
        if local_name == "terraform" {
            return Self::new(BUILTIN_HOSTNAME, BUILTIN_NAMESPACE, "terraform");
        }
        Self::new(DEFAULT_HOSTNAME, DEFAULT_NAMESPACE, local_name)
    }

    /// Deduce the address from a provider executable path, assuming the
    /// default registry and namespace.
    ///
    /// `/opt/bin/terraform-provider-azurerm` becomes
    /// `registry.terraform.io/hashicorp/azurerm`.
    pub fn from_executable(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let name = file_name.strip_prefix(EXECUTABLE_PREFIX).unwrap_or(file_name);
        // Release archives append a version, as in `..._v3.1.0_x5`.
        let name = name
            .match_indices("_v")
            .find(|(at, _)| name[at + 2..].starts_with(|c: char| c.is_ascii_digit()))
            .map_or(name, |(at, _)| &name[..at]);
        if name.is_empty() {
            return None;
        }
        Some(Self::implied(name))
    }

    pub fn is_builtin(&self) -> bool {
        self.hostname == BUILTIN_HOSTNAME && self.namespace == BUILTIN_NAMESPACE
    }
}

impl FromStr for ProviderAddr {
    type Err = SchemaError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| SchemaError::InvalidAddr {
            input: input.to_string(),
            message: message.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("address is empty"));
        }

        let parts: Vec<String> = trimmed.split('/').map(str::to_ascii_lowercase).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("address contains an empty segment"));
        }
        for part in &parts {
            let valid = part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
            if !valid {
                return Err(invalid("address contains invalid characters"));
            }
        }

        match parts.as_slice() {
            [name] => Ok(Self::implied(name)),
            [namespace, name] => {
                if namespace == "-" {
                    Ok(Self::implied(name))
                } else {
                    Ok(Self::new(DEFAULT_HOSTNAME, namespace.as_str(), name.as_str()))
                }
            }
            [hostname, namespace, name] => {
                Ok(Self::new(hostname.as_str(), namespace.as_str(), name.as_str()))
            }
            _ => Err(invalid("expected [hostname/][namespace/]type")),
        }
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.name)
    }
}
