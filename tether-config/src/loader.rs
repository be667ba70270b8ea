//! Configuration loading and environment variable handling

use crate::domains::utils::parse_seconds;
use crate::domains::TetherConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TETHER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<TetherConfig> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        self.from_yaml_str(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<TetherConfig> {
        // An empty file is a valid, all-defaults configuration
        let mut config: TetherConfig = if content.trim().is_empty() {
            TetherConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<TetherConfig> {
        let mut config = TetherConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<TetherConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut TetherConfig) -> ConfigResult<()> {
        self.apply_endpoint_overrides(&mut config.endpoint)?;
        self.apply_launcher_overrides(&mut config.launcher)?;
        self.apply_supervisor_overrides(&mut config.supervisor)?;
        self.apply_channel_overrides(&mut config.channel)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_endpoint_overrides(
        &self,
        config: &mut crate::domains::endpoint::EndpointConfig,
    ) -> ConfigResult<()> {
        if let Ok(host) = self.get_env_var("HOST") {
            config.host = host;
        }

        if let Ok(port) = self.get_env_var("PORT") {
            config.port = self.parse_var("PORT", &port)?;
        }

        Ok(())
    }

    fn apply_launcher_overrides(
        &self,
        config: &mut crate::domains::launcher::LauncherConfig,
    ) -> ConfigResult<()> {
        if let Ok(executable) = self.get_env_var("EXECUTABLE") {
            config.executable = executable;
        }

        if let Ok(keep_input_open) = self.get_env_var("KEEP_INPUT_OPEN") {
            config.keep_input_open = self.parse_var("KEEP_INPUT_OPEN", &keep_input_open)?;
        }

        Ok(())
    }

    fn apply_supervisor_overrides(
        &self,
        config: &mut crate::domains::supervisor::SupervisorConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("SHUTDOWN_TIMEOUT") {
            config.shutdown_timeout = self.parse_seconds_var("SHUTDOWN_TIMEOUT", &timeout)?;
        }

        if let Ok(timeout) = self.get_env_var("KILL_TIMEOUT") {
            config.kill_timeout = self.parse_seconds_var("KILL_TIMEOUT", &timeout)?;
        }

        Ok(())
    }

    fn apply_channel_overrides(
        &self,
        config: &mut crate::domains::channel::ChannelConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("CONNECT_TIMEOUT") {
            config.connect_timeout = Some(self.parse_seconds_var("CONNECT_TIMEOUT", &timeout)?);
        }

        if let Ok(timeout) = self.get_env_var("RESPONSE_TIMEOUT") {
            config.response_timeout = Some(self.parse_seconds_var("RESPONSE_TIMEOUT", &timeout)?);
        }

        if let Ok(authkey) = self.get_env_var("AUTHKEY") {
            if !authkey.is_empty() {
                config.authkey = Some(authkey);
            }
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|message| self.env_error("LOG_LEVEL", message))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|message| self.env_error("LOG_FORMAT", message))?;
        }

        Ok(())
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(self.var_name(name))
    }

    fn env_error(&self, name: &str, message: impl std::fmt::Display) -> ConfigError {
        ConfigError::EnvError {
            var: self.var_name(name),
            message: message.to_string(),
        }
    }

    fn parse_var<T>(&self, name: &str, value: &str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value.trim().parse().map_err(|e| {
            self.env_error(name, format!("cannot parse '{}': {}", value, e))
        })
    }

    fn parse_seconds_var(&self, name: &str, value: &str) -> ConfigResult<Duration> {
        parse_seconds(value).map_err(|message| self.env_error(name, message))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
