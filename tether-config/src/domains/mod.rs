//! Domain-specific configuration modules

pub mod channel;
pub mod endpoint;
pub mod launcher;
pub mod logging;
pub mod supervisor;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Tether configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TetherConfig {
    /// Where the worker listens
    #[serde(default)]
    pub endpoint: endpoint::EndpointConfig,

    /// How the worker is launched and awaited
    #[serde(default)]
    pub launcher: launcher::LauncherConfig,

    /// Process termination policy
    #[serde(default)]
    pub supervisor: supervisor::SupervisorConfig,

    /// Client connection settings
    #[serde(default)]
    pub channel: channel::ChannelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl TetherConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.endpoint.validate()?;
        self.launcher.validate()?;
        self.supervisor.validate()?;
        self.channel.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = TetherConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
