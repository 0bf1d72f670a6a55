// ABOUTME: Configuration for the relay: listen address, target, socket tuning
// Loaded from TOML with serde defaults; CLI flags override file values

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::relay::Target;

/// Name of the config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "pool-relay.toml";

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to accept clients on
    pub listen: String,

    /// Upstream `host:port`; every IP the host resolves to gets a pool member
    pub target: String,

    // === Outbound sockets ===
    /// TCP keep-alive idle time and probe interval
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Connect timeout for pool dials (unset: OS default)
    #[serde(
        with = "optional_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_timeout: Option<Duration>,

    /// Disable Nagle's algorithm on pool members
    pub nodelay: bool,

    // === Forwarding ===
    /// Copy buffer size per direction, in bytes
    pub buffer_size: usize,

    /// Wait after a failed accept before trying again
    #[serde(with = "duration_secs")]
    pub accept_backoff: Duration,

    /// Upper bound on single-member redials running at once
    pub max_concurrent_redials: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9080".to_string(),
            target: "mainnet-pociot.helium.io:9080".to_string(),

            keepalive_interval: Duration::from_secs(3),
            connect_timeout: None,
            nodelay: false,

            buffer_size: 1024,
            accept_backoff: Duration::from_secs(1),
            max_concurrent_redials: 8,
        }
    }
}

impl RelayConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise the first file found in
    /// [`Self::config_paths`] is used, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        for path in Self::config_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Config file paths in order of precedence
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. Working directory
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(LOCAL_CONFIG_FILE));
        }

        // 2. User config (~/.config/pool-relay/config.toml on Linux)
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("pool-relay").join("config.toml"));
        }

        paths
    }

    /// Check invariants and parse the target.
    pub fn validate(&self) -> Result<Target> {
        let target: Target = self
            .target
            .parse()
            .with_context(|| format!("Invalid target '{}'", self.target))?;

        ensure!(!self.listen.trim().is_empty(), "listen address must not be empty");
        ensure!(self.buffer_size > 0, "buffer_size must be greater than 0");
        ensure!(
            self.max_concurrent_redials > 0,
            "max_concurrent_redials must be greater than 0"
        );
        ensure!(
            !self.keepalive_interval.is_zero(),
            "keepalive_interval must be at least 1 second"
        );

        Ok(target)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Serde helper for Duration as seconds (u64)
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Same as `duration_secs` for optional values
mod optional_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
