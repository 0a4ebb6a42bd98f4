//! Run configuration: the optional `terrafix.toml` file.

pub mod loader;
pub mod schema;

pub use loader::{load_from_dir, load_from_path, load_from_str, ConfigError, DEFAULT_FILE_NAME};
pub use schema::{FixerConfig, RunConfig, ValidationError, ValidationIssue};

use crate::fixer::{CommandFixer, DummyFixer, Fixer};

impl FixerConfig {
    pub fn build(&self) -> Box<dyn Fixer> {
        match self {
            FixerConfig::Dummy { suffix, attribute } => {
                let mut fixer = DummyFixer::new().with_suffix(suffix.as_str());
                if let Some(attribute) = attribute {
                    fixer = fixer.with_attribute(attribute.as_str());
                }
                Box::new(fixer)
            }
            FixerConfig::Command { command, args } => {
                Box::new(CommandFixer::new(command).with_args(args.iter().cloned()))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FixerConfig::Dummy { .. } => "dummy",
            FixerConfig::Command { .. } => "command",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_empty_config_is_default() {
        let config = load_from_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.fixer.kind(), "dummy");
    }

    #[test]
    fn test_full_config() {
        let config = load_from_str(
            r#"
provider = "hashicorp/azurerm"
provider_schema = "schema.json"
state = "state.json"
output = "out"

[fixer]
kind = "command"
command = "/opt/terraform-provider-azurerm"
args = ["fix"]
"#,
        )
        .unwrap();
        assert_eq!(config.provider_schema, Some(PathBuf::from("schema.json")));
        assert_eq!(
            config.fixer,
            FixerConfig::Command {
                command: PathBuf::from("/opt/terraform-provider-azurerm"),
                args: vec!["fix".to_string()],
            }
        );
        assert_eq!(
            config.provider_addr().unwrap().to_string(),
            "registry.terraform.io/hashicorp/azurerm"
        );
    }

    #[test]
    fn test_provider_deduced_from_command() {
        let config = load_from_str(
            "[fixer]\nkind = \"command\"\ncommand = \"bin/terraform-provider-widget\"\n",
        )
        .unwrap();
        assert_eq!(
            config.provider_addr().unwrap().to_string(),
            "registry.terraform.io/hashicorp/widget"
        );
    }

    #[test]
    fn test_dummy_defaults() {
        let config = load_from_str("[fixer]\nkind = \"dummy\"\n").unwrap();
        assert_eq!(
            config.fixer,
            FixerConfig::Dummy {
                suffix: "-updated".to_string(),
                attribute: None,
            }
        );
        assert_eq!(config.provider_addr(), None);
    }

    #[test]
    fn test_validation_collects_issues() {
        let err = load_from_str(
            "provider = \"a/b/c/d\"\n[fixer]\nkind = \"dummy\"\nattribute = \"no equals sign\"\n",
        )
        .unwrap_err();
        match err {
            ConfigError::Validation { path: None, source } => {
                assert_eq!(source.issues.len(), 2);
                let text = source.to_string();
                assert!(text.contains("'provider'"));
                assert!(text.contains("'fixer.attribute'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_sources_are_chained() {
        use std::error::Error;

        let err = load_from_str("[fixer]\nkind = \"command\"\ncommand = \"\"\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid run config: missing required field 'fixer.command'"
        );
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "missing required field 'fixer.command'");

        let err = load_from_str("provider = [\n").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse run config TOML: "));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_unknown_fixer_kind() {
        let err = load_from_str("[fixer]\nkind = \"magic\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { path: None, .. }));
    }
}
