//! Client channel configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the connection that ships payloads to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bound on connecting and completing the handshake; `null` waits forever
    #[serde(
        with = "crate::domains::utils::serde_duration_option",
        default = "default_connect_timeout"
    )]
    pub connect_timeout: Option<Duration>,

    /// Bound on waiting for the worker's reply; `null` waits forever
    #[serde(with = "crate::domains::utils::serde_duration_option", default)]
    pub response_timeout: Option<Duration>,

    /// Largest frame accepted or sent
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Pre-shared key. Prefer the TETHER_AUTHKEY environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authkey: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            response_timeout: None,
            max_frame_bytes: default_max_frame_bytes(),
            authkey: None,
        }
    }
}

impl Validatable for ChannelConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(timeout) = self.connect_timeout {
            validate_duration(timeout, "connect_timeout", self.domain_name())?;
        }
        if let Some(timeout) = self.response_timeout {
            validate_duration(timeout, "response_timeout", self.domain_name())?;
        }
        validate_positive(self.max_frame_bytes, "max_frame_bytes", self.domain_name())?;

        if matches!(self.authkey.as_deref(), Some("")) {
            return Err(self.validation_error("authkey cannot be empty; omit it to disable authentication"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "channel"
    }
}

fn default_connect_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}
