//! Worker launch configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_flag, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the worker executable is started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Program to run, e.g. an interpreter or the worker binary itself
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Arguments placed before the bind flag, e.g. the worker script
    #[serde(default)]
    pub args: Vec<String>,

    /// Flag that carries the combined `host:port` bind address
    #[serde(default = "default_bind_flag")]
    pub bind_flag: String,

    /// Keep the worker's stdin open for later writes
    #[serde(default)]
    pub keep_input_open: bool,

    /// How to decide the worker is ready for connections
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// Readiness strategy after the worker has been spawned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadinessConfig {
    /// Poll the endpoint until the worker greets (and authenticates)
    Probe {
        #[serde(with = "crate::domains::utils::serde_duration", default = "default_probe_timeout")]
        timeout: Duration,

        #[serde(
            with = "crate::domains::utils::serde_duration_millis",
            default = "default_poll_interval"
        )]
        poll_interval_ms: Duration,
    },

    /// Sleep a fixed time and assume the worker is listening
    FixedDelay {
        #[serde(with = "crate::domains::utils::serde_duration", default = "default_settle")]
        settle: Duration,
    },
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            bind_flag: default_bind_flag(),
            keep_input_open: false,
            readiness: ReadinessConfig::default(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        ReadinessConfig::Probe {
            timeout: default_probe_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ReadinessConfig {
    /// Fixed settle delay with the traditional 5 second default
    pub fn fixed_delay() -> Self {
        ReadinessConfig::FixedDelay {
            settle: default_settle(),
        }
    }
}

impl Validatable for LauncherConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.executable, "executable", self.domain_name())?;
        validate_flag(&self.bind_flag, "bind_flag", self.domain_name())?;

        if self.args.iter().any(|arg| arg == &self.bind_flag) {
            return Err(self.validation_error(format!(
                "args must not contain the bind flag '{}'; it is appended automatically",
                self.bind_flag
            )));
        }

        match &self.readiness {
            ReadinessConfig::Probe {
                timeout,
                poll_interval_ms,
            } => {
                validate_duration(*timeout, "readiness.timeout", self.domain_name())?;
                validate_duration(*poll_interval_ms, "readiness.poll_interval_ms", self.domain_name())?;
                if poll_interval_ms > timeout {
                    return Err(self.validation_error(
                        "readiness.poll_interval_ms must not exceed readiness.timeout",
                    ));
                }
            }
            ReadinessConfig::FixedDelay { .. } => {}
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "launcher"
    }
}

fn default_executable() -> String {
    "python3".to_string()
}

fn default_bind_flag() -> String {
    "--bind".to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_settle() -> Duration {
    Duration::from_secs(5)
}
