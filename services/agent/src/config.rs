//! Configuration for the reconciler.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::executor::ExecutorConfig;

/// Engine endpoint used when neither `DOCKHAND_DOCKER_HOST` nor
/// `DOCKER_HOST` is set.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Docker Engine endpoint (`unix://` only).
    pub docker_host: String,

    /// Default graceful stop timeout.
    pub stop_timeout: Duration,

    /// Bound on waiting for transient container states.
    pub settle_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            stop_timeout: Duration::from_secs(10),
            settle_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let docker_host = lookup("DOCKHAND_DOCKER_HOST")
            .or_else(|| lookup("DOCKER_HOST"))
            .unwrap_or(defaults.docker_host);

        let stop_timeout = match lookup("DOCKHAND_STOP_TIMEOUT") {
            Some(value) => parse_secs("DOCKHAND_STOP_TIMEOUT", &value)?,
            None => defaults.stop_timeout,
        };

        let settle_timeout = match lookup("DOCKHAND_SETTLE_TIMEOUT") {
            Some(value) => parse_secs("DOCKHAND_SETTLE_TIMEOUT", &value)?,
            None => defaults.settle_timeout,
        };

        let log_level = lookup("DOCKHAND_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            docker_host,
            stop_timeout,
            settle_timeout,
            log_level,
        })
    }

    /// Path of the engine's Unix socket.
    pub fn socket_path(&self) -> Result<PathBuf> {
        match self.docker_host.strip_prefix("unix://") {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => bail!(
                "unsupported docker host '{}': only unix:// sockets are supported",
                self.docker_host
            ),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            stop_timeout: self.stop_timeout,
            settle_timeout: self.settle_timeout,
            ..ExecutorConfig::default()
        }
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got '{value}'"))?;
    Ok(Duration::from_secs(secs))
}
