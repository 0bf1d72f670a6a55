// ABOUTME: Relay target (host and port) parsed from a `host:port` string
// ABOUTME: Immutable once handed to a ConnectionPool

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a target address
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    /// No `:port` suffix
    #[error("Target '{0}' is missing a port (expected host:port)")]
    MissingPort(String),

    /// Port is not a valid u16
    #[error("Invalid port '{port}' in target '{target}'")]
    InvalidPort { target: String, port: String },

    /// Host part is empty
    #[error("Target '{0}' has an empty host")]
    EmptyHost(String),
}

/// Host and port the pool connects to.
///
/// IPv6 literals must be bracketed: `[::1]:9080`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TargetError::MissingPort(s.to_string()))?;

        // Bracketed IPv6 literal
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(TargetError::EmptyHost(s.to_string()));
        }
        if host.contains(':') && !s.starts_with('[') {
            return Err(TargetError::MissingPort(s.to_string()));
        }

        let port = port.parse::<u16>().map_err(|_| TargetError::InvalidPort {
            target: s.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Target {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
