//! Logging setup for Tether
//!
//! Every binary in the workspace logs through `tracing`. This crate turns a
//! [`LoggingConfig`](tether_config::LoggingConfig) into a global subscriber.
//! All output goes to stderr so stdout stays free for command results.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing, init_worker_tracing};
