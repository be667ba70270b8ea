//! Launching the worker on a guarded endpoint and waiting for it to listen

use std::time::Duration;
use tether_config::{LauncherConfig, ReadinessConfig, TetherConfig};
use tether_ipc::{
    AuthKey, ChannelOptions, Endpoint, ErrorCategory, PayloadChannel, AUTHKEY_ENV_VAR,
};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::endpoint::{EndpointGuard, EndpointStatus};
use crate::error::{LaunchError, SupervisorError};
use crate::process::{ProcessSupervisor, StartOutcome, StopOutcome, SupervisorOptions};

/// How the launcher decides a freshly spawned worker accepts connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessMode {
    /// Poll the endpoint until the worker greets (and authenticates)
    Probe {
        timeout: Duration,
        poll_interval: Duration,
    },
    /// Sleep for a fixed time and assume the worker is listening
    FixedDelay { settle: Duration },
}

impl Default for ReadinessMode {
    fn default() -> Self {
        ReadinessMode::Probe {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&ReadinessConfig> for ReadinessMode {
    fn from(config: &ReadinessConfig) -> Self {
        match config {
            ReadinessConfig::Probe {
                timeout,
                poll_interval_ms,
            } => ReadinessMode::Probe {
                timeout: *timeout,
                poll_interval: *poll_interval_ms,
            },
            ReadinessConfig::FixedDelay { settle } => ReadinessMode::FixedDelay { settle: *settle },
        }
    }
}

/// What to run for the worker and how to treat it once started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherOptions {
    pub executable: String,
    pub args: Vec<String>,
    pub bind_flag: String,
    pub keep_input_open: bool,
    pub readiness: ReadinessMode,
}

impl LauncherOptions {
    /// Options for `executable` with the default bind flag and readiness probe
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            bind_flag: "--bind".to_string(),
            keep_input_open: false,
            readiness: ReadinessMode::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessMode) -> Self {
        self.readiness = readiness;
        self
    }
}

impl From<&LauncherConfig> for LauncherOptions {
    fn from(config: &LauncherConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            args: config.args.clone(),
            bind_flag: config.bind_flag.clone(),
            keep_input_open: config.keep_input_open,
            readiness: ReadinessMode::from(&config.readiness),
        }
    }
}

/// Result of [`ServerLauncher::start_server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A new worker was spawned and is ready
    Started { pid: u32 },
    /// A live worker already existed; nothing was launched
    AlreadyRunning { pid: u32 },
}

impl LaunchOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            LaunchOutcome::Started { pid } | LaunchOutcome::AlreadyRunning { pid } => *pid,
        }
    }
}

/// Starts and stops the worker listening on one endpoint
pub struct ServerLauncher {
    endpoint: Endpoint,
    options: LauncherOptions,
    supervisor: ProcessSupervisor,
    channel: PayloadChannel,
    authkey: Option<AuthKey>,
}

impl ServerLauncher {
    pub fn new(endpoint: Endpoint, options: LauncherOptions) -> Self {
        Self {
            endpoint,
            options,
            supervisor: ProcessSupervisor::default(),
            channel: PayloadChannel::default(),
            authkey: None,
        }
    }

    /// Build a launcher from loaded configuration.
    ///
    /// The key comes from the `channel.authkey` setting, falling back to the
    /// `TETHER_AUTHKEY` environment variable.
    pub fn from_config(config: &TetherConfig) -> Self {
        let endpoint = Endpoint::new(config.endpoint.host.clone(), config.endpoint.port);
        let authkey = config
            .channel
            .authkey
            .as_deref()
            .map(AuthKey::from)
            .or_else(AuthKey::from_env);

        Self::new(endpoint, LauncherOptions::from(&config.launcher))
            .with_supervisor_options(SupervisorOptions::from(&config.supervisor))
            .with_channel(PayloadChannel::new(ChannelOptions {
                connect_timeout: config.channel.connect_timeout,
                response_timeout: config.channel.response_timeout,
                max_frame_bytes: config.channel.max_frame_bytes,
            }))
            .with_authkey(authkey)
    }

    pub fn with_supervisor_options(mut self, options: SupervisorOptions) -> Self {
        self.supervisor = ProcessSupervisor::new(options);
        self
    }

    pub fn with_channel(mut self, channel: PayloadChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_authkey(mut self, authkey: Option<AuthKey>) -> Self {
        self.authkey = authkey;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &LauncherOptions {
        &self.options
    }

    pub fn channel(&self) -> &PayloadChannel {
        &self.channel
    }

    pub fn authkey(&self) -> Option<&AuthKey> {
        self.authkey.as_ref()
    }

    /// Direct access to the supervisor, e.g. for `write_input`
    pub fn supervisor(&mut self) -> &mut ProcessSupervisor {
        &mut self.supervisor
    }

    /// `[executable, args..., bind_flag, "host:port"]`
    pub fn worker_command(&self) -> Vec<String> {
        let mut command = Vec::with_capacity(self.options.args.len() + 3);
        command.push(self.options.executable.clone());
        command.extend(self.options.args.iter().cloned());
        command.push(self.options.bind_flag.clone());
        command.push(self.endpoint.to_string());
        command
    }

    pub fn is_running(&mut self) -> bool {
        self.supervisor.is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    /// Move to a new endpoint. Rejected while our worker runs or something
    /// is bound at the current one; the new endpoint is not checked here.
    ///
    /// A current endpoint that cannot be bound at all (for example a host
    /// that is not local) does not block the change, so a misconfigured
    /// endpoint can always be replaced.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) -> Result<(), LaunchError> {
        if self.supervisor.is_running()
            || EndpointGuard::probe(&self.endpoint) == EndpointStatus::InUse
        {
            return Err(LaunchError::EndpointBusy {
                endpoint: self.endpoint.clone(),
            });
        }

        debug!("Endpoint changed from {} to {}", self.endpoint, endpoint);
        self.endpoint = endpoint;
        Ok(())
    }

    /// Spawn the worker on the endpoint and wait until it is ready.
    pub async fn start_server(&mut self) -> Result<LaunchOutcome, LaunchError> {
        if self.supervisor.is_running() {
            if let Some(pid) = self.supervisor.pid() {
                info!("Worker already running on {} (pid {})", self.endpoint, pid);
                return Ok(LaunchOutcome::AlreadyRunning { pid });
            }
        }

        if EndpointGuard::port_in_use(&self.endpoint) {
            error!("Endpoint {} is already in use", self.endpoint);
            return Err(LaunchError::EndpointConflict {
                endpoint: self.endpoint.clone(),
            });
        }

        let command = self.worker_command();
        let envs: Vec<(&str, String)> = self
            .authkey
            .iter()
            .map(|key| (AUTHKEY_ENV_VAR, key.to_env_value()))
            .collect();

        let pid = match self
            .supervisor
            .start_with_env(command.as_slice(), self.options.keep_input_open, envs)
            .await?
        {
            StartOutcome::Started { pid } => pid,
            StartOutcome::AlreadyRunning { pid } => {
                return Ok(LaunchOutcome::AlreadyRunning { pid })
            }
        };

        self.wait_until_ready().await?;
        info!("Worker {} is ready on {}", pid, self.endpoint);
        Ok(LaunchOutcome::Started { pid })
    }

    /// Stop the worker, escalating to a kill after the shutdown timeout
    pub async fn stop_server(&mut self) -> Result<StopOutcome, SupervisorError> {
        self.supervisor.stop().await
    }

    async fn wait_until_ready(&mut self) -> Result<(), LaunchError> {
        match self.options.readiness.clone() {
            ReadinessMode::FixedDelay { settle } => {
                debug!("Waiting {:?} for the worker to settle", settle);
                sleep(settle).await;
                if !self.supervisor.is_running() {
                    return Err(self.worker_exited());
                }
                Ok(())
            }
            ReadinessMode::Probe {
                timeout,
                poll_interval,
            } => self.probe_until_ready(timeout, poll_interval).await,
        }
    }

    async fn probe_until_ready(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), LaunchError> {
        let deadline = Instant::now() + timeout;

        loop {
            if !self.supervisor.is_running() {
                return Err(self.worker_exited());
            }

            let attempt = timeout_at(
                deadline,
                self.channel.probe(&self.endpoint, self.authkey.as_ref()),
            )
            .await;

            match attempt {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if e.category() == ErrorCategory::Authentication => {
                    warn!("Worker on {} rejected authentication: {}", self.endpoint, e);
                    self.stop_quietly().await;
                    return Err(e.into());
                }
                Ok(Err(e)) => debug!("Worker not ready on {}: {}", self.endpoint, e),
                Err(_) => {}
            }

            if Instant::now() >= deadline {
                warn!(
                    "Worker did not become ready on {} within {:?}",
                    self.endpoint, timeout
                );
                self.stop_quietly().await;
                return Err(LaunchError::ReadinessTimeout {
                    endpoint: self.endpoint.clone(),
                    timeout,
                });
            }

            sleep(poll_interval).await;
        }
    }

    async fn stop_quietly(&mut self) {
        if let Err(e) = self.supervisor.stop().await {
            error!("Failed to stop worker that never became ready: {}", e);
        }
    }

    fn worker_exited(&self) -> LaunchError {
        let status = self
            .supervisor
            .last_exit_status()
            .map(|status| status.to_string())
            .unwrap_or_else(|| "unknown status".to_string());
        LaunchError::WorkerExited { status }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener as StdTcpListener;
    use tether_ipc::WorkerListener;

    fn free_port() -> u16 {
        StdTcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    /// `sh -c 'sleep 30' sh --bind host:port`: stays alive, never listens
    fn idle_worker(readiness: ReadinessMode) -> LauncherOptions {
        LauncherOptions::new("sh")
            .with_args(["-c", "sleep 30", "sh"])
            .with_readiness(readiness)
    }

    fn quick_stop() -> SupervisorOptions {
        SupervisorOptions {
            shutdown_timeout: Duration::from_millis(500),
            kill_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_worker_command_shape() {
        let launcher = ServerLauncher::new(
            Endpoint::new("127.0.0.1", 9001),
            LauncherOptions::new("python3").with_args(["calc_server.py"]),
        );
        assert_eq!(
            launcher.worker_command(),
            vec!["python3", "calc_server.py", "--bind", "127.0.0.1:9001"]
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = LauncherConfig {
            readiness: ReadinessConfig::fixed_delay(),
            ..Default::default()
        };
        let options = LauncherOptions::from(&config);
        assert_eq!(
            options.readiness,
            ReadinessMode::FixedDelay {
                settle: Duration::from_secs(5)
            }
        );
        assert_eq!(options.bind_flag, "--bind");
    }

    #[tokio::test]
    async fn test_conflict_spawns_nothing() {
        let holder = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::localhost(holder.local_addr().unwrap().port());

        let mut launcher = ServerLauncher::new(endpoint, idle_worker(ReadinessMode::default()));
        let err = launcher.start_server().await.unwrap_err();

        assert!(matches!(err, LaunchError::EndpointConflict { .. }));
        assert_eq!(err.exit_code(), Some(101));
        assert!(!launcher.is_running());
        assert_eq!(launcher.pid(), None);
    }

    #[tokio::test]
    async fn test_fixed_delay_then_already_running() {
        let mut launcher = ServerLauncher::new(
            Endpoint::localhost(free_port()),
            idle_worker(ReadinessMode::FixedDelay {
                settle: Duration::from_millis(100),
            }),
        )
        .with_supervisor_options(quick_stop());

        let first = launcher.start_server().await.unwrap();
        assert!(matches!(first, LaunchOutcome::Started { .. }));
        assert!(launcher.is_running());

        let second = launcher.start_server().await.unwrap();
        assert_eq!(second, LaunchOutcome::AlreadyRunning { pid: first.pid() });

        assert!(matches!(
            launcher.stop_server().await.unwrap(),
            StopOutcome::Terminated { .. }
        ));
        assert!(!launcher.is_running());
        assert_eq!(launcher.stop_server().await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_readiness_timeout_stops_worker() {
        let mut launcher = ServerLauncher::new(
            Endpoint::localhost(free_port()),
            idle_worker(ReadinessMode::Probe {
                timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(50),
            }),
        )
        .with_supervisor_options(quick_stop());

        let err = launcher.start_server().await.unwrap_err();
        assert!(matches!(err, LaunchError::ReadinessTimeout { .. }), "got {}", err);
        assert!(!launcher.is_running());
    }

    #[tokio::test]
    async fn test_worker_exiting_early_is_reported() {
        let mut launcher = ServerLauncher::new(
            Endpoint::localhost(free_port()),
            LauncherOptions::new("sh").with_args(["-c", "exit 2", "sh"]),
        );

        let err = launcher.start_server().await.unwrap_err();
        assert!(matches!(err, LaunchError::WorkerExited { .. }), "got {}", err);
        assert!(!launcher.is_running());
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let mut launcher = ServerLauncher::new(
            Endpoint::localhost(free_port()),
            LauncherOptions::new("/nonexistent/tether-worker"),
        );

        let err = launcher.start_server().await.unwrap_err();
        match err {
            LaunchError::Supervisor(inner) => assert!(inner.is_spawn_error()),
            other => panic!("expected spawn error, got {}", other),
        }
    }

    /// Stands in for the worker: greets on the endpoint shortly after the
    /// launcher has passed its endpoint check.
    fn late_listener(endpoint: Endpoint, authkey: Option<AuthKey>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            let listener = WorkerListener::bind(&endpoint, authkey).await.unwrap();
            loop {
                let Ok(mut connection) = listener.accept().await else {
                    continue;
                };
                if let Ok(Some(_)) = connection.next_request().await {
                    let _ = connection.respond(&json!({"status": "ok"})).await;
                }
            }
        })
    }

    #[tokio::test]
    async fn test_probe_readiness_with_authentication() {
        let endpoint = Endpoint::localhost(free_port());
        let key = AuthKey::from("pre-shared");
        let listener = late_listener(endpoint.clone(), Some(key.clone()));

        let mut launcher = ServerLauncher::new(
            endpoint,
            idle_worker(ReadinessMode::Probe {
                timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(50),
            }),
        )
        .with_supervisor_options(quick_stop())
        .with_authkey(Some(key));

        let outcome = launcher.start_server().await.unwrap();
        assert!(matches!(outcome, LaunchOutcome::Started { .. }));

        launcher.stop_server().await.unwrap();
        listener.abort();
    }

    #[tokio::test]
    async fn test_probe_with_wrong_key_fails_fast() {
        let endpoint = Endpoint::localhost(free_port());
        let listener = late_listener(endpoint.clone(), Some(AuthKey::from("pre-shared")));

        let mut launcher = ServerLauncher::new(
            endpoint,
            idle_worker(ReadinessMode::Probe {
                timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(50),
            }),
        )
        .with_supervisor_options(quick_stop())
        .with_authkey(Some(AuthKey::from("wrong")));

        let err = launcher.start_server().await.unwrap_err();
        match err {
            LaunchError::Ipc(inner) => assert_eq!(inner.category(), ErrorCategory::Authentication),
            other => panic!("expected authentication failure, got {}", other),
        }
        assert!(!launcher.is_running());
        listener.abort();
    }

    #[tokio::test]
    async fn test_set_endpoint() {
        let mut launcher = ServerLauncher::new(
            Endpoint::localhost(free_port()),
            LauncherOptions::new("python3"),
        );
        let next = Endpoint::localhost(free_port());
        launcher.set_endpoint(next.clone()).unwrap();
        assert_eq!(launcher.endpoint(), &next);

        let holder = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let busy = Endpoint::localhost(holder.local_addr().unwrap().port());
        launcher.set_endpoint(busy.clone()).unwrap();

        let err = launcher.set_endpoint(next).unwrap_err();
        assert!(matches!(err, LaunchError::EndpointBusy { .. }));
        assert_eq!(launcher.endpoint(), &busy);
    }

    #[tokio::test]
    async fn test_unbindable_endpoint_can_be_replaced() {
        // TEST-NET-3, never a local address
        let mut launcher = ServerLauncher::new(
            Endpoint::new("203.0.113.7", 9000),
            LauncherOptions::new("python3"),
        );
        let next = Endpoint::localhost(free_port());
        launcher.set_endpoint(next.clone()).unwrap();
        assert_eq!(launcher.endpoint(), &next);
    }
}
