//! Gateway configuration (`wshookd.toml`).
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! upstream = "127.0.0.1:6667"
//! read_buffer_size = 65536
//! write_timeout_ms = 5000
//! binary = false
//! log_filter = "info"
//! ```
//!
//! Only `upstream` is required, in the file or as `--upstream`. Command-line
//! flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use wshook::MessageKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no upstream address given (set `upstream` or pass --upstream)")]
    MissingUpstream,
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address WebSocket clients connect to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// TCP service decoded messages are relayed to. May come from `--upstream`
    /// instead.
    #[serde(default)]
    pub upstream: String,
    /// Largest chunk read from a socket in one go.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Write timeout on client sockets, 0 to block indefinitely.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Send binary frames instead of text frames.
    #[serde(default)]
    pub binary: bool,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_read_buffer_size() -> usize {
    65536
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<String>,
    pub upstream: Option<String>,
    pub binary: bool,
}

impl GatewayConfig {
    /// Defaults for everything but the upstream address.
    pub fn new(upstream: impl Into<String>) -> Self {
        GatewayConfig {
            listen: default_listen(),
            upstream: upstream.into(),
            read_buffer_size: default_read_buffer_size(),
            write_timeout_ms: default_write_timeout_ms(),
            binary: false,
            log_filter: default_log_filter(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse `path` without validating, so overrides can fill gaps first.
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Build the effective config from an optional file plus overrides.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = match (path, &overrides.upstream) {
            (Some(path), _) => Self::read(path)?,
            (None, Some(upstream)) => Self::new(upstream.clone()),
            (None, None) => return Err(ConfigError::MissingUpstream),
        };
        if let Some(listen) = overrides.listen {
            config.listen = listen;
        }
        if let Some(upstream) = overrides.upstream {
            config.upstream = upstream;
        }
        config.binary |= overrides.binary;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.trim().is_empty() {
            return Err(ConfigError::MissingUpstream);
        }
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen address is empty"));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be greater than 0"));
        }
        Ok(())
    }

    pub fn message_kind(&self) -> MessageKind {
        if self.binary {
            MessageKind::Binary
        } else {
            MessageKind::Text
        }
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}
