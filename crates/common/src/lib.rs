//! Shared wire types for the fleet coordination protocol.
//!
//! Both the `fleetd` daemon and the `fleetd-client` library depend on this
//! crate so the two sides agree on request and response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result kind that marks a binary artifact requiring decode-and-store
/// handling instead of plain report persistence.
pub const ARTIFACT_KIND_SCREENSHOT: &str = "screenshot";

/// Command kind used when a dispatch omits one.
pub const DEFAULT_COMMAND_KIND: &str = "shell";

/// Command kind used for operator broadcasts.
pub const BROADCAST_COMMAND_KIND: &str = "message";

fn default_command_kind() -> String {
    DEFAULT_COMMAND_KIND.to_string()
}

/// A command queued for a specific agent.
///
/// Minted by dispatch, removed from the queue by the poll that delivers it;
/// a delivered command is never redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub id: i64,
    pub kind: String,
    pub payload: String,
}

/// Registry entry for one agent: the attributes it reported at registration
/// merged with the server-assigned bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub source_address: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Operator-supplied command shape; the kind defaults to `shell`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default = "default_command_kind")]
    pub kind: String,
    #[serde(default)]
    pub payload: String,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            kind: default_command_kind(),
            payload: String::new(),
        }
    }
}

impl CommandSpec {
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Shell command, the default kind.
    pub fn shell(payload: impl Into<String>) -> Self {
        Self::new(DEFAULT_COMMAND_KIND, payload)
    }
}

/// Body of `POST /cmd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub command: CommandSpec,
}

/// Body of `POST /data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Body of `POST /report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub identifier: String,
    #[serde(default)]
    pub result: ReportResult,
}

/// Result carried by an execution report. The payload of a screenshot result
/// is a base64 string, optionally prefixed with a data URI header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportResult {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl ReportResult {
    pub fn is_artifact(&self) -> bool {
        self.kind == ARTIFACT_KIND_SCREENSHOT
            && self.payload.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Body of `POST /api/send-message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_defaults_to_shell() {
        let spec: CommandSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.kind, "shell");
        assert_eq!(spec.payload, "");
    }

    #[test]
    fn dispatch_request_tolerates_missing_fields() {
        let req: DispatchRequest = serde_json::from_str("{}").unwrap();
        assert!(req.identifier.is_none());
        assert_eq!(req.command.kind, "shell");
    }

    #[test]
    fn report_result_artifact_detection() {
        let screenshot = ReportResult {
            kind: ARTIFACT_KIND_SCREENSHOT.to_string(),
            payload: Some("aGVsbG8=".to_string()),
        };
        assert!(screenshot.is_artifact());

        let empty_payload = ReportResult {
            kind: ARTIFACT_KIND_SCREENSHOT.to_string(),
            payload: Some(String::new()),
        };
        assert!(!empty_payload.is_artifact());

        let shell = ReportResult {
            kind: "shell".to_string(),
            payload: Some("aGVsbG8=".to_string()),
        };
        assert!(!shell.is_artifact());
    }

    #[test]
    fn agent_record_round_trips_flattened_attributes() {
        let raw = serde_json::json!({
            "first_seen": "2026-08-07T10:00:00Z",
            "last_seen": "2026-08-07T10:05:00Z",
            "source_address": "10.0.0.5",
            "computer_name": "BOX1",
            "user": "alice",
        });
        let record: AgentRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.source_address, "10.0.0.5");
        assert_eq!(record.attributes["computer_name"], "BOX1");
        assert_eq!(record.attributes["user"], "alice");
    }
}
