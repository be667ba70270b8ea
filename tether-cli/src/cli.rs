//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Host the worker binds to (overrides configuration)
    #[arg(long, value_name = "HOST", global = true)]
    pub host: Option<String>,

    /// Port the worker binds to (overrides configuration)
    #[arg(long, value_name = "PORT", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker and keep it running until Ctrl-C
    Serve,

    /// Start the worker, load a calculator, print the reply and stop
    Run {
        #[command(flatten)]
        calculator: CalculatorSource,
    },

    /// Load a calculator into a worker that is already running
    Send {
        #[command(flatten)]
        calculator: CalculatorSource,
    },

    /// Report whether the worker endpoint is free
    CheckEndpoint,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

/// Where the calculator payload comes from
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct CalculatorSource {
    /// Calculator as inline JSON (example: --calculator-json='{"method":"hf"}')
    #[arg(long, value_name = "JSON")]
    pub calculator_json: Option<String>,

    /// Path to a JSON file holding the calculator
    #[arg(long, value_name = "PATH")]
    pub calculator_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path (stdout when omitted)
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_one_calculator_source() {
        assert!(Cli::try_parse_from(["tether", "run"]).is_err());
        assert!(Cli::try_parse_from([
            "tether",
            "run",
            "--calculator-json",
            "{}",
            "--calculator-file",
            "calc.json"
        ])
        .is_err());

        let cli = Cli::try_parse_from(["tether", "--port", "9100", "run", "--calculator-json", "42"])
            .unwrap();
        assert_eq!(cli.port, Some(9100));
        match cli.command {
            Commands::Run { calculator } => {
                assert_eq!(calculator.calculator_json.as_deref(), Some("42"))
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tether", "check-endpoint", "--host", "0.0.0.0"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert!(matches!(cli.command, Commands::CheckEndpoint));
    }
}
