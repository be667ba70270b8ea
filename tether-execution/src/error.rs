//! Error types for worker supervision and launch

use std::io;
use std::time::Duration;
use tether_ipc::{Endpoint, IpcError};
use thiserror::Error;

/// Exit status the top-level binary uses when the endpoint is already taken
pub const ENDPOINT_CONFLICT_EXIT_CODE: i32 = 101;

/// Errors from [`ProcessSupervisor`](crate::ProcessSupervisor)
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Cannot start a worker from an empty command")]
    EmptyCommand,

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to kill worker process {pid}: {source}")]
    KillFailed {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("No worker process is running")]
    NotRunning,

    #[error("Worker stdin is not attached")]
    InputClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SupervisorError {
    /// Whether this error happened while launching the child
    pub fn is_spawn_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::EmptyCommand | SupervisorError::SpawnFailed { .. }
        )
    }
}

/// Errors from [`ServerLauncher`](crate::ServerLauncher)
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Endpoint {endpoint} is already in use")]
    EndpointConflict { endpoint: Endpoint },

    #[error("Cannot change endpoint while {endpoint} is in use")]
    EndpointBusy { endpoint: Endpoint },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Worker did not become ready on {endpoint} within {timeout:?}")]
    ReadinessTimeout { endpoint: Endpoint, timeout: Duration },

    #[error("Worker exited before becoming ready ({status})")]
    WorkerExited { status: String },

    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl LaunchError {
    /// Process exit status reserved for this error, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            LaunchError::EndpointConflict { .. } => Some(ENDPOINT_CONFLICT_EXIT_CODE),
            _ => None,
        }
    }
}

/// Errors from [`CalcServer`](crate::CalcServer)
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No calculator has been set")]
    NoCalculator,

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl SessionError {
    /// Process exit status reserved for this error, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SessionError::Launch(err) => err.exit_code(),
            _ => None,
        }
    }
}
