use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why a Tether configuration could not be produced
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration file {}: {source}", path.display())]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `TETHER_*` override that does not parse; `var` is the full variable name
    #[error("{var}: {message}")]
    EnvError { var: String, message: String },

    #[error("Invalid {domain} configuration: {message}")]
    DomainError { domain: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(domain: &str, message: impl Into<String>) -> Self {
        ConfigError::DomainError {
            domain: domain.to_string(),
            message: message.into(),
        }
    }
}
