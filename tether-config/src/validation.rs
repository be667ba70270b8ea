//! Per-domain checks run after every load

use crate::error::{ConfigError, ConfigResult};
use std::time::Duration;

/// A configuration section that can reject its own values
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Section name used in error messages, e.g. `launcher`
    fn domain_name(&self) -> &'static str;

    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::invalid(self.domain_name(), message)
    }
}

pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(
            domain,
            format!("{} must not be blank", field_name),
        ));
    }
    Ok(())
}

pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::invalid(
            domain,
            format!("{} must be positive, got {}", field_name, value),
        ));
    }
    Ok(())
}

/// Zero timeouts would make the supervisor kill or give up instantly
pub fn validate_duration(value: Duration, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid(
            domain,
            format!("{} must be longer than zero", field_name),
        ));
    }
    Ok(())
}

/// The bind flag is passed as one argv element before `host:port`
pub fn validate_flag(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(value, field_name, domain)?;
    if !value.starts_with('-') || value.contains(char::is_whitespace) {
        return Err(ConfigError::invalid(
            domain,
            format!(
                "{} must be a single command-line flag such as --bind, got '{}'",
                field_name, value
            ),
        ));
    }
    Ok(())
}
