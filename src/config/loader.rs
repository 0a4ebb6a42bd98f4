use crate::config::schema::{RunConfig, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default run file name, looked up in the configuration root.
pub const DEFAULT_FILE_NAME: &str = "terrafix.toml";

/// Errors loading a run file. `path` is `None` for in-memory input.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read run config from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse run config TOML{}: {source}", origin(.path))]
    Toml {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid run config{}: {source}", origin(.path))]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

/// Deserialize and validate run file text read from `path`, if any.
fn parse(input: &str, path: Option<&Path>) -> Result<RunConfig, ConfigError> {
    let path = || path.map(Path::to_path_buf);
    let config: RunConfig = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        path: path(),
        source,
    })?;
    config.validate().map_err(|source| ConfigError::Validation {
        path: path(),
        source,
    })?;
    Ok(config)
}

pub fn load_from_str(input: &str) -> Result<RunConfig, ConfigError> {
    parse(input, None)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RunConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, Some(path))
}

/// Load `dir/terrafix.toml` when present; a missing file yields the
/// default config.
pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<RunConfig, ConfigError> {
    let path = dir.as_ref().join(DEFAULT_FILE_NAME);
    if !path.is_file() {
        return Ok(RunConfig::default());
    }
    load_from_path(path)
}
