//! Fleet client library.
//!
//! HTTP client for the fleetd coordination daemon. Covers both sides of the
//! protocol: the agent exchange (register, poll, report) and the operator
//! exchange (dispatch, broadcast, registry listing). Polling cadence and
//! retries are the caller's business; every method is a single round trip.

use std::collections::HashMap;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use fleet_common::{AgentRecord, CommandSpec, QueuedCommand, ARTIFACT_KIND_SCREENSHOT};
use serde_json::{json, Map, Value};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not registered with the daemon")]
    NotRegistered,
    #[error("daemon rejected request: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub struct FleetClient {
    http: reqwest::Client,
    base_url: String,
    identifier: Option<String>,
}

impl FleetClient {
    /// Client with no identity yet; operator-side calls work immediately,
    /// agent-side calls require `register` first.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            identifier: None,
        }
    }

    /// Register against the daemon and return a connected client.
    pub async fn connect(base_url: impl Into<String>, attributes: Map<String, Value>) -> Result<Self> {
        let mut client = Self::new(base_url);
        client.register(attributes).await?;
        Ok(client)
    }

    /// Identifier assigned by the daemon, if registered.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Register this client as an agent. The daemon derives the identifier
    /// from the `computer_name` and `user` attributes.
    pub async fn register(&mut self, attributes: Map<String, Value>) -> Result<String> {
        let body: Value = self
            .http
            .post(self.url("/register"))
            .json(&Value::Object(attributes))
            .send()
            .await
            .context("register request failed")?
            .error_for_status()
            .context("register rejected")?
            .json()
            .await
            .context("register response is not JSON")?;

        let identifier = body
            .get("identifier")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::InvalidResponse("missing identifier".to_string()))?
            .to_string();

        debug!(identifier = %identifier, "registered with daemon");
        self.identifier = Some(identifier.clone());
        Ok(identifier)
    }

    /// Submit an opaque data snapshot for this agent.
    pub async fn send_data(&self, data: Value) -> Result<()> {
        let identifier = self.ident()?;
        self.http
            .post(self.url("/data"))
            .json(&json!({ "identifier": identifier, "data": data }))
            .send()
            .await
            .context("data request failed")?
            .error_for_status()
            .context("data rejected")?;
        Ok(())
    }

    /// Fetch at most one pending command. The daemon removes a returned
    /// command from the queue; it will not be delivered again.
    pub async fn poll(&self) -> Result<Option<QueuedCommand>> {
        let identifier = self.ident()?;
        let body: Value = self
            .http
            .get(self.url(&format!("/cmd/{identifier}")))
            .send()
            .await
            .context("poll request failed")?
            .error_for_status()
            .context("poll rejected")?
            .json()
            .await
            .context("poll response is not JSON")?;

        match body.get("command") {
            Some(command) => {
                let command: QueuedCommand = serde_json::from_value(command.clone())
                    .map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
                Ok(Some(command))
            }
            None => Ok(None),
        }
    }

    /// Report an execution result.
    pub async fn report(&self, kind: &str, payload: &str) -> Result<()> {
        let identifier = self.ident()?;
        self.http
            .post(self.url("/report"))
            .json(&json!({
                "identifier": identifier,
                "result": { "kind": kind, "payload": payload },
            }))
            .send()
            .await
            .context("report request failed")?
            .error_for_status()
            .context("report rejected")?;
        Ok(())
    }

    /// Report a screenshot capture; bytes are base64-encoded and sent with a
    /// data URI header the daemon strips before decoding.
    pub async fn report_screenshot(&self, bytes: &[u8]) -> Result<()> {
        let payload = format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(bytes)
        );
        self.report(ARTIFACT_KIND_SCREENSHOT, &payload).await
    }

    /// Operator side: queue a command for a specific agent.
    pub async fn dispatch(&self, identifier: &str, command: CommandSpec) -> Result<i64> {
        let response = self
            .http
            .post(self.url("/cmd"))
            .json(&json!({ "identifier": identifier, "command": command }))
            .send()
            .await
            .context("dispatch request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::Rejected("Client not found".to_string()).into());
        }

        let body: Value = response
            .error_for_status()
            .context("dispatch rejected")?
            .json()
            .await
            .context("dispatch response is not JSON")?;

        body.get("commandId")
            .and_then(Value::as_i64)
            .ok_or_else(|| ClientError::InvalidResponse("missing commandId".to_string()).into())
    }

    /// Operator side: queue a message command for every registered agent.
    pub async fn broadcast(&self, message: &str) -> Result<()> {
        self.http
            .post(self.url("/api/send-message"))
            .json(&json!({ "message": message }))
            .send()
            .await
            .context("broadcast request failed")?
            .error_for_status()
            .context("broadcast rejected")?;
        Ok(())
    }

    /// Operator side: full registry snapshot.
    pub async fn clients(&self) -> Result<HashMap<String, AgentRecord>> {
        self.http
            .get(self.url("/api/clients"))
            .send()
            .await
            .context("clients request failed")?
            .error_for_status()
            .context("clients rejected")?
            .json()
            .await
            .context("clients response is not JSON")
    }

    /// Liveness probe.
    pub async fn health(&self) -> Result<bool> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .context("health request failed")?;
        Ok(response.status().is_success())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ident(&self) -> Result<&str> {
        self.identifier
            .as_deref()
            .ok_or_else(|| ClientError::NotRegistered.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = FleetClient::new("http://127.0.0.1:5000/");
        assert_eq!(client.url("/health"), "http://127.0.0.1:5000/health");
    }

    #[test]
    fn agent_calls_require_registration() {
        let client = FleetClient::new("http://127.0.0.1:5000");
        let err = client.ident().unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }
}
