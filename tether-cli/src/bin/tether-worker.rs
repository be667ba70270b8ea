//! Reference worker: listens on `--bind host:port` and holds the last
//! calculator it was sent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value as JsonValue};
use tether_ipc::{AuthKey, Endpoint, RequestHandler, WorkerListener, WorkerRequest};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tether-worker", version, about, long_about = None)]
struct WorkerArgs {
    /// Address to listen on
    #[arg(long, value_name = "HOST:PORT")]
    bind: Endpoint,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[derive(Default)]
struct CalculatorHolder {
    calculator: Option<JsonValue>,
    loads: u64,
}

#[async_trait]
impl RequestHandler for CalculatorHolder {
    async fn handle(&mut self, request: WorkerRequest) -> JsonValue {
        match request {
            WorkerRequest::SetupCalculator { calculator } => {
                self.loads += 1;
                info!(
                    "Calculator loaded ({} so far, replaced previous: {})",
                    self.loads,
                    self.calculator.is_some()
                );
                self.calculator = Some(calculator);
                json!({"status": "ok"})
            }
        }
    }
}

/// Resolves on SIGTERM or Ctrl-C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();

    // Worker output goes to stderr only
    tether_logging::init_worker_tracing(args.log_level.as_deref())?;

    let authkey = AuthKey::from_env();
    let listener = WorkerListener::bind(&args.bind, authkey)
        .await
        .with_context(|| format!("Failed to bind worker to {}", args.bind))?;

    let mut holder = CalculatorHolder::default();
    listener.serve(&mut holder, shutdown_signal()).await?;

    info!("Worker shutting down after {} calculator loads", holder.loads);
    Ok(())
}
