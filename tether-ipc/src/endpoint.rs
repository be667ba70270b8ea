//! Network endpoint the worker listens on

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A `(host, port)` pair identifying where the worker listens
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Error parsing an endpoint from `host:port`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("Endpoint '{0}' is missing a ':port' suffix")]
    MissingPort(String),

    #[error("Endpoint '{0}' has an empty host")]
    EmptyHost(String),

    #[error("Endpoint '{input}' has an invalid port: {reason}")]
    InvalidPort { input: String, reason: String },
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback endpoint on the given port
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    /// Address tuple suitable for `bind` / `connect`
    pub fn as_socket_tuple(&self) -> (&str, u16) {
        (self.host_without_brackets(), self.port)
    }

    fn host_without_brackets(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::localhost(9000)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host_without_brackets();
        if host.contains(':') {
            write!(f, "[{}]:{}", host, self.port)
        } else {
            write!(f, "{}:{}", host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(s.to_string()));
        }

        let port = port.parse::<u16>().map_err(|e| EndpointParseError::InvalidPort {
            input: s.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(host, port))
    }
}
