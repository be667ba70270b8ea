use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tether_config::{ConfigLoader, LogLevel, TetherConfig, Validatable};
use tether_execution::{CalcServer, EndpointGuard, EndpointStatus, LaunchError, SessionError};
use tracing::{debug, error, info, warn};

mod cli;
use cli::{CalculatorSource, Cli, Commands, ConfigCommands};

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(cli: &Cli) -> Result<TetherConfig> {
    let loader = ConfigLoader::new();

    let mut config = match cli.config.as_ref() {
        Some(path) => loader
            .from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => loader
            .from_env()
            .context("Failed to load configuration from environment")?,
    };

    if let Some(host) = &cli.host {
        config.endpoint.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.endpoint.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = LogLevel::from_str(level).map_err(anyhow::Error::msg)?;
    }

    config
        .endpoint
        .validate()
        .context("Invalid endpoint override")?;
    Ok(config)
}

/// Read the calculator payload from inline JSON or a file
fn read_calculator(source: &CalculatorSource) -> Result<JsonValue> {
    match (&source.calculator_json, &source.calculator_file) {
        (Some(json), _) => serde_json::from_str(json).context("Failed to parse calculator JSON"),
        (None, Some(path)) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read calculator file {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse calculator file {:?}", path))
        }
        (None, None) => Err(anyhow::anyhow!(
            "Provide --calculator-json or --calculator-file"
        )),
    }
}

/// Start the worker and keep it alive until Ctrl-C or until it exits
async fn serve_command(config: &TetherConfig) -> Result<()> {
    let mut session = CalcServer::from_config(config);
    let outcome = session.start_server().await?;
    println!(
        "Worker running on {} (pid {})",
        session.endpoint(),
        outcome.pid()
    );

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping worker");
                break;
            }
            _ = poll.tick() => {
                if !session.is_running() {
                    let status = session
                        .launcher_mut()
                        .supervisor()
                        .last_exit_status()
                        .map(|status| status.to_string())
                        .unwrap_or_else(|| "unknown status".to_string());
                    error!("Worker exited unexpectedly ({})", status);
                    return Err(anyhow::anyhow!(
                        "Worker on {} exited unexpectedly ({})",
                        session.endpoint(),
                        status
                    ));
                }
            }
        }
    }

    let stopped = session.kill_server().await?;
    info!("Worker stopped: {:?}", stopped);
    Ok(())
}

/// Start the worker, load the calculator, print the reply and stop again
async fn run_command(config: &TetherConfig, source: &CalculatorSource) -> Result<()> {
    let calculator = read_calculator(source)?;

    let mut session = CalcServer::from_config(config);
    session.set_calculator(&calculator)?;
    session.start_server().await?;

    let loaded = session.load_calculator().await;

    if let Err(e) = session.kill_server().await {
        warn!("Failed to stop worker: {}", e);
    }

    let response = loaded?;
    println!("{}", serde_json::to_string(&response.message)?);
    Ok(())
}

/// Load the calculator into a worker someone else started
async fn send_command(config: &TetherConfig, source: &CalculatorSource) -> Result<()> {
    let calculator = read_calculator(source)?;

    let mut session = CalcServer::from_config(config);
    session.set_calculator(&calculator)?;

    let response = session.load_calculator().await?;
    println!("{}", serde_json::to_string(&response.message)?);
    Ok(())
}

fn check_endpoint_command(config: &TetherConfig) -> Result<()> {
    let endpoint = tether_execution::Endpoint::new(config.endpoint.host.clone(), config.endpoint.port);

    match EndpointGuard::probe(&endpoint) {
        EndpointStatus::Free => {
            println!("{} is free", endpoint);
            Ok(())
        }
        EndpointStatus::InUse => {
            println!("{} is in use", endpoint);
            Err(LaunchError::EndpointConflict { endpoint }.into())
        }
        EndpointStatus::Unavailable => {
            println!("{} is unavailable", endpoint);
            Err(anyhow::anyhow!("Cannot bind {} on this host", endpoint))
        }
    }
}

/// Handle configuration validation
fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = TetherConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(output, sample).context("Failed to write configuration file")?;

    println!("Configuration generated at: {:?}", output);
    println!(
        "Validate with: tether config validate --config-file {:?}",
        output
    );
    Ok(())
}

/// Exit status for a failed command: the reserved conflict code or 1
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<LaunchError>()
                .and_then(LaunchError::exit_code)
                .or_else(|| {
                    cause
                        .downcast_ref::<SessionError>()
                        .and_then(SessionError::exit_code)
                })
        })
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    // Config commands work without a valid environment
    if let Commands::Config { config_cmd } = &cli.command {
        tether_logging::init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
        return match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
            ConfigCommands::Generate { output, force } => {
                handle_config_generate(output.as_ref(), *force)
            }
        };
    }

    let config = load_config(&cli)?;
    tether_logging::init_logging_from_config(&config.logging)?;
    debug!("Tether CLI starting");

    match &cli.command {
        Commands::Serve => serve_command(&config).await,
        Commands::Run { calculator } => run_command(&config, calculator).await,
        Commands::Send { calculator } => send_command(&config, calculator).await,
        Commands::CheckEndpoint => check_endpoint_command(&config),
        Commands::Config { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}
