//! Tether execution layer
//!
//! Supervises the worker process, guards its endpoint, launches it with the
//! `--bind host:port` contract and keeps a calculator session on top.

pub mod endpoint;
pub mod error;
pub mod launcher;
pub mod process;
pub mod session;

// Re-export main types
pub use endpoint::{Endpoint, EndpointGuard, EndpointStatus};
pub use error::{LaunchError, SessionError, SupervisorError, ENDPOINT_CONFLICT_EXIT_CODE};
pub use launcher::{LaunchOutcome, LauncherOptions, ReadinessMode, ServerLauncher};
pub use process::{ProcessSupervisor, StartOutcome, StopOutcome, SupervisorOptions};
pub use session::CalcServer;
