use anyhow::{Context, Result};
use tether_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Build the filter for a logging configuration.
///
/// `RUST_LOG` wins when set; otherwise the configured level is the base
/// directive and any extra directives are layered on top.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(config.level.to_string())
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    for directive in &config.directives {
        let parsed = directive
            .parse()
            .with_context(|| format!("Invalid log directive '{}'", directive))?;
        filter = filter.add_directive(parsed);
    }

    Ok(filter)
}

/// Initialize logging from configuration
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    // Use try_init to avoid panic if global subscriber already set
    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Tracing for worker processes.
///
/// Workers run with their stdout possibly inherited by the supervisor, so
/// output goes to stderr without ANSI colours.
pub fn init_worker_tracing(log_level: Option<&str>) -> Result<()> {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    tracing::debug!("Worker tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_config::LogLevel;

    #[test]
    fn test_filter_from_level_and_directives() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                level: LogLevel::Warn,
                directives: vec!["tether_ipc=trace".to_string()],
                ..Default::default()
            };
            let filter = build_env_filter(&config).unwrap().to_string();
            assert!(filter.contains("warn"));
            assert!(filter.contains("tether_ipc=trace"));
        });
    }

    #[test]
    fn test_invalid_directive_is_reported() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                directives: vec!["tether_ipc=loud".to_string()],
                ..Default::default()
            };
            let err = build_env_filter(&config).unwrap_err();
            assert!(err.to_string().contains("tether_ipc=loud"));
        });
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        temp_env::with_var("RUST_LOG", Some("tether_execution=debug"), || {
            let filter = build_env_filter(&LoggingConfig::default()).unwrap().to_string();
            assert_eq!(filter, "tether_execution=debug");
        });
    }

    #[test]
    fn test_repeated_initialization_is_harmless() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                format: LogFormat::Json,
                ..Default::default()
            };
            assert!(init_logging_from_config(&config).is_ok());
            assert!(init_logging_from_config(&LoggingConfig::default()).is_ok());
            assert!(init_simple_tracing("debug").is_ok());
            assert!(init_worker_tracing(Some("not a level ===")).is_ok());
        });
    }
}
