//! Logging setup for the `terrafix` binary.
//!
//! Library code only emits `tracing` events; the subscriber is installed
//! here, once, writing to stderr so previews on stdout stay clean.
//!
//! The filter comes from `--log-level`, then `TERRAFIX_LOG`, then
//! [`DEFAULT_FILTER`]. Any `EnvFilter` directive works, e.g.
//! `terrafix::ctrl=debug,warn`.

use std::io;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const ENV_VAR: &str = "TERRAFIX_LOG";
pub const DEFAULT_FILTER: &str = "warn";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Explicit filter directive; overrides the environment.
    pub filter: Option<String>,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            with_ansi: true,
            with_target: false,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_ansi(mut self, enable: bool) -> Self {
        self.with_ansi = enable;
        self
    }

    /// The filter directive in effect, given the value of `TERRAFIX_LOG`.
    pub fn directive(&self, env: Option<String>) -> String {
        self.filter
            .clone()
            .or(env)
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string())
    }

    pub fn env_filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_new(self.directive(std::env::var(ENV_VAR).ok()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber. Fails on a bad filter directive or when
/// a subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.with_ansi)
        .with_target(config.with_target)
        .without_time();

    tracing_subscriber::registry()
        .with(config.env_filter()?)
        .with(layer)
        .try_init()?;
    Ok(())
}
