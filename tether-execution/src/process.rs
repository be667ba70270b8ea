//! Supervision of a single worker process

use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tether_config::SupervisorConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;

/// Termination policy for a [`ProcessSupervisor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// How long a worker gets to exit after the graceful signal
    pub shutdown_timeout: Duration,
    /// How long to wait for the process to disappear after a forced kill
    pub kill_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&SupervisorConfig> for SupervisorOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout,
            kill_timeout: config.kill_timeout,
        }
    }
}

/// Result of [`ProcessSupervisor::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started { pid } | StartOutcome::AlreadyRunning { pid } => *pid,
        }
    }
}

/// Result of [`ProcessSupervisor::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no live worker
    NotRunning,
    /// The worker exited after the graceful signal
    Terminated { status: ExitStatus },
    /// The worker outlived the shutdown timeout and was killed
    ForceKilled { status: ExitStatus },
}

struct SupervisedChild {
    child: Child,
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
}

/// Owns at most one worker child process.
///
/// Liveness is never cached: every query runs a non-blocking `try_wait` on the
/// child. Children are spawned with kill-on-drop, so dropping the supervisor
/// never leaves an orphaned worker behind.
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    current: Option<SupervisedChild>,
    last_exit_status: Option<ExitStatus>,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            current: None,
            last_exit_status: None,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Launch `command` unless a worker is already alive.
    pub async fn start<S: AsRef<str>>(
        &mut self,
        command: &[S],
        keep_input_open: bool,
    ) -> Result<StartOutcome, SupervisorError> {
        self.start_with_env(command, keep_input_open, std::iter::empty::<(&str, &str)>())
            .await
    }

    /// Launch `command` with extra environment variables for the child.
    pub async fn start_with_env<S, I, K, V>(
        &mut self,
        command: &[S],
        keep_input_open: bool,
        envs: I,
    ) -> Result<StartOutcome, SupervisorError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        if self.is_running() {
            if let Some(pid) = self.pid() {
                info!("Worker process {} is already running", pid);
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
        }

        let (program, args) = command.split_first().ok_or(SupervisorError::EmptyCommand)?;
        if program.as_ref().trim().is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        let command_line = command
            .iter()
            .map(|part| part.as_ref())
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(program.as_ref());
        cmd.args(args.iter().map(|arg| arg.as_ref()))
            .envs(envs)
            .stdin(if keep_input_open {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        debug!("Spawning worker: {}", command_line);
        let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            command: command_line.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            command: command_line.clone(),
            source: io::Error::new(io::ErrorKind::Other, "child exited before its pid was read"),
        })?;

        info!("Started worker process {}: {}", pid, command_line);
        self.current = Some(SupervisedChild {
            child,
            pid,
            command: command_line,
            started_at: Utc::now(),
        });
        Ok(StartOutcome::Started { pid })
    }

    /// Stop the worker: graceful signal, then forced kill after the timeout.
    ///
    /// The handle is cleared on every path. Only a failed forced kill is an
    /// error.
    pub async fn stop(&mut self) -> Result<StopOutcome, SupervisorError> {
        let Some(mut supervised) = self.current.take() else {
            debug!("No worker process to stop");
            return Ok(StopOutcome::NotRunning);
        };
        let pid = supervised.pid;

        if let Ok(Some(status)) = supervised.child.try_wait() {
            debug!("Worker process {} had already exited with {}", pid, status);
            self.last_exit_status = Some(status);
            return Ok(StopOutcome::NotRunning);
        }

        info!(
            "Stopping worker process {} (running since {})",
            pid, supervised.started_at
        );
        send_terminate(&mut supervised.child, pid);

        match timeout(self.options.shutdown_timeout, supervised.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Worker process {} terminated with {}", pid, status);
                self.last_exit_status = Some(status);
                return Ok(StopOutcome::Terminated { status });
            }
            Ok(Err(e)) => {
                error!("Error waiting for worker process {}: {}", pid, e);
            }
            Err(_) => {
                warn!(
                    "Worker process {} did not exit within {:?}, killing it",
                    pid, self.options.shutdown_timeout
                );
            }
        }

        supervised
            .child
            .start_kill()
            .map_err(|source| SupervisorError::KillFailed { pid, source })?;

        match timeout(self.options.kill_timeout, supervised.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Worker process {} killed ({})", pid, status);
                self.last_exit_status = Some(status);
                Ok(StopOutcome::ForceKilled { status })
            }
            Ok(Err(source)) => Err(SupervisorError::KillFailed { pid, source }),
            Err(_) => {
                error!("Worker process {} survived a forced kill", pid);
                Err(SupervisorError::KillFailed {
                    pid,
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("still alive {:?} after kill", self.options.kill_timeout),
                    ),
                })
            }
        }
    }

    /// Whether a worker is alive right now. Never blocks.
    pub fn is_running(&mut self) -> bool {
        let Some(supervised) = self.current.as_mut() else {
            return false;
        };

        match supervised.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(
                    "Worker process {} ({}) exited with {}",
                    supervised.pid, supervised.command, status
                );
                self.last_exit_status = Some(status);
                self.current = None;
                false
            }
            Err(e) => {
                // Dropping the handle kills whatever is left of the child
                warn!("Cannot query worker process {}: {}", supervised.pid, e);
                self.current = None;
                false
            }
        }
    }

    /// Pid of the current worker handle, if any
    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().map(|supervised| supervised.pid)
    }

    /// Command line of the current worker, as launched
    pub fn command(&self) -> Option<&str> {
        self.current.as_ref().map(|supervised| supervised.command.as_str())
    }

    /// Exit status of the most recent worker observed to exit
    pub fn last_exit_status(&self) -> Option<ExitStatus> {
        self.last_exit_status
    }

    /// Write bytes to the worker's stdin (requires `keep_input_open`)
    pub async fn write_input(&mut self, bytes: &[u8]) -> Result<(), SupervisorError> {
        let supervised = self.current.as_mut().ok_or(SupervisorError::NotRunning)?;
        let stdin = supervised
            .child
            .stdin
            .as_mut()
            .ok_or(SupervisorError::InputClosed)?;

        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the worker's stdin so it sees end of input
    pub fn close_input(&mut self) -> Result<(), SupervisorError> {
        let supervised = self.current.as_mut().ok_or(SupervisorError::NotRunning)?;
        supervised
            .child
            .stdin
            .take()
            .map(drop)
            .ok_or(SupervisorError::InputClosed)
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to worker process {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, pid: u32) {
    // No graceful signal available; terminate directly
    if let Err(e) = child.start_kill() {
        warn!("Failed to terminate worker process {}: {}", pid, e);
    }
}
