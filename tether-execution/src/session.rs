//! A calculator session: one worker plus the payload it should hold

use serde::Serialize;
use serde_json::Value as JsonValue;
use tether_config::TetherConfig;
use tether_ipc::{Endpoint, IpcError, ResponseEnvelope, WorkerRequest};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::launcher::{LaunchOutcome, ServerLauncher};
use crate::process::StopOutcome;

/// Keeps a calculator payload and ships it to the worker on request
pub struct CalcServer {
    launcher: ServerLauncher,
    calculator: Option<JsonValue>,
}

impl CalcServer {
    pub fn new(launcher: ServerLauncher) -> Self {
        Self {
            launcher,
            calculator: None,
        }
    }

    pub fn from_config(config: &TetherConfig) -> Self {
        Self::new(ServerLauncher::from_config(config))
    }

    pub fn launcher(&self) -> &ServerLauncher {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut ServerLauncher {
        &mut self.launcher
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.launcher.endpoint()
    }

    pub fn calculator(&self) -> Option<&JsonValue> {
        self.calculator.as_ref()
    }

    /// Store a calculator. Encoding happens here so failures surface early.
    pub fn set_calculator<T: Serialize + ?Sized>(&mut self, calculator: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(calculator)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        self.calculator = Some(value);
        Ok(())
    }

    pub fn clear_calculator(&mut self) -> Option<JsonValue> {
        self.calculator.take()
    }

    pub async fn start_server(&mut self) -> Result<LaunchOutcome, SessionError> {
        Ok(self.launcher.start_server().await?)
    }

    pub async fn kill_server(&mut self) -> Result<StopOutcome, SessionError> {
        Ok(self.launcher.stop_server().await?)
    }

    pub fn is_running(&mut self) -> bool {
        self.launcher.is_running()
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) -> Result<(), SessionError> {
        Ok(self.launcher.set_endpoint(endpoint)?)
    }

    /// Send the stored calculator to the worker and return its reply
    pub async fn load_calculator(&self) -> Result<ResponseEnvelope, SessionError> {
        let calculator = self.calculator.clone().ok_or(SessionError::NoCalculator)?;
        let request = WorkerRequest::SetupCalculator { calculator };

        debug!("Loading calculator into worker at {}", self.endpoint());
        let response = self
            .launcher
            .channel()
            .send(self.endpoint(), &request, self.launcher.authkey())
            .await?;

        info!("Worker at {} acknowledged the calculator", self.endpoint());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::LauncherOptions;
    use serde_json::json;
    use std::collections::HashMap;
    use tether_ipc::{AuthKey, WorkerListener};

    fn session_for(endpoint: Endpoint) -> CalcServer {
        CalcServer::new(ServerLauncher::new(endpoint, LauncherOptions::new("python3")))
    }

    #[test]
    fn test_calculator_accessors() {
        let mut session = session_for(Endpoint::localhost(9000));
        assert!(session.calculator().is_none());

        session
            .set_calculator(&json!({"method": "b3lyp", "basis": "def2-svp"}))
            .unwrap();
        assert_eq!(session.calculator().unwrap()["method"], "b3lyp");

        assert!(session.clear_calculator().is_some());
        assert!(session.calculator().is_none());
    }

    #[test]
    fn test_unencodable_calculator_is_rejected_at_setter() {
        let mut session = session_for(Endpoint::localhost(9000));
        let mut bad = HashMap::new();
        bad.insert(vec![1u8, 2], "map keys must be strings");

        let err = session.set_calculator(&bad).unwrap_err();
        assert!(matches!(err, SessionError::Ipc(IpcError::SerializationError(_))));
        assert!(session.calculator().is_none());
    }

    #[tokio::test]
    async fn test_load_without_calculator() {
        let session = session_for(Endpoint::localhost(9000));
        let err = session.load_calculator().await.unwrap_err();
        assert!(matches!(err, SessionError::NoCalculator));
    }

    #[tokio::test]
    async fn test_load_calculator_round_trip() {
        let key = AuthKey::from("pre-shared");
        let listener = WorkerListener::bind(&Endpoint::localhost(0), Some(key.clone()))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();

        let worker = tokio::spawn(async move {
            let mut connection = listener.accept().await.unwrap();
            let request = connection.next_request().await.unwrap().unwrap();
            connection.respond(&json!({"status": "ok"})).await.unwrap();
            request
        });

        let mut session = CalcServer::new(
            ServerLauncher::new(endpoint, LauncherOptions::new("python3")).with_authkey(Some(key)),
        );
        session.set_calculator(&json!({"charge": 0})).unwrap();

        let response = session.load_calculator().await.unwrap();
        assert_eq!(response.message, json!({"status": "ok"}));

        let WorkerRequest::SetupCalculator { calculator } = worker.await.unwrap();
        assert_eq!(calculator, json!({"charge": 0}));
    }

    #[tokio::test]
    async fn test_load_against_absent_worker_is_connection_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut session = session_for(Endpoint::localhost(port));
        session.set_calculator(&1).unwrap();

        match session.load_calculator().await.unwrap_err() {
            SessionError::Ipc(err) => assert!(err.is_connection_error()),
            other => panic!("expected connection error, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_kill_without_worker() {
        let mut session = session_for(Endpoint::localhost(9000));
        assert!(!session.is_running());
        assert_eq!(session.kill_server().await.unwrap(), StopOutcome::NotRunning);
    }
}
