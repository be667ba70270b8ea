//! Domain-driven configuration management for Tether
//!
//! This crate provides modular configuration split by functional domains,
//! with validation, defaults, and environment variable support.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    channel::ChannelConfig,
    endpoint::EndpointConfig,
    launcher::{LauncherConfig, ReadinessConfig},
    logging::{LogFormat, LogLevel, LoggingConfig},
    supervisor::SupervisorConfig,
    TetherConfig,
};

// Re-export utilities
pub use domains::utils::{parse_seconds, serde_duration, serde_duration_millis, serde_duration_option};
