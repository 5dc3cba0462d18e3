//! Shared daemon state: the client registry and the per-agent command queues.
//!
//! Registry and queues are one unit. The coordinator wraps `State` in a
//! single `Arc<tokio::sync::Mutex<_>>` and every read or write of either
//! structure happens under that guard for the whole critical section; sink
//! file I/O happens after the guard is released. The journal append inside
//! the guard is the one tolerated exception.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use fleet_common::{AgentRecord, QueuedCommand};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::identity;
use crate::journal::Journal;

/// Server-assigned record fields. Stripped from incoming attributes so an
/// agent cannot spoof its own bookkeeping.
const RESERVED_FIELDS: [&str; 3] = ["first_seen", "last_seen", "source_address"];

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("unknown client {0}")]
    UnknownClient(String),
}

pub struct State {
    clients: HashMap<String, AgentRecord>,
    pending: HashMap<String, VecDeque<QueuedCommand>>,
    journal: Journal,
}

impl State {
    pub fn new(journal: Journal) -> Self {
        Self {
            clients: HashMap::new(),
            pending: HashMap::new(),
            journal,
        }
    }

    /// Register an agent: mint an identifier, store its record and create an
    /// empty command queue for it, atomically with respect to the guard.
    ///
    /// Always succeeds. A registration that collides with an existing
    /// identifier overwrites the record and resets the queue.
    pub fn register(&mut self, attributes: Map<String, Value>, source_address: String) -> (String, AgentRecord) {
        let identifier = identity::mint(&attributes);
        let now = Utc::now();

        let mut attributes = attributes;
        for field in RESERVED_FIELDS {
            attributes.remove(field);
        }

        let record = AgentRecord {
            first_seen: now,
            last_seen: now,
            source_address,
            attributes,
        };

        self.clients.insert(identifier.clone(), record.clone());
        self.pending.insert(identifier.clone(), VecDeque::new());

        let _ = self.journal.append(
            "REGISTER",
            &identifier,
            json!({"source_address": record.source_address}),
        );

        (identifier, record)
    }

    /// Refresh `last_seen` for a known agent. Unknown identifiers are a
    /// silent no-op: agents keep reporting after a daemon restart has
    /// emptied the registry, and that must not fail the exchange.
    pub fn touch(&mut self, identifier: &str) {
        if let Some(record) = self.clients.get_mut(identifier) {
            record.last_seen = Utc::now();
        }
    }

    /// Read-only snapshot of the full registry, with deterministic key
    /// order so repeated snapshots without intervening writes are
    /// byte-identical once serialized.
    pub fn clients_snapshot(&self) -> Value {
        let mut snapshot = Map::new();
        for (identifier, record) in &self.clients {
            snapshot.insert(
                identifier.clone(),
                serde_json::to_value(record).unwrap_or(Value::Null),
            );
        }
        Value::Object(snapshot)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Append a command to the tail of an agent's queue.
    ///
    /// Fails with `UnknownClient` when the agent never registered; the queue
    /// is never created as a side effect of dispatch.
    pub fn enqueue(&mut self, identifier: &str, kind: String, payload: String) -> Result<i64, StateError> {
        let command = self.push_command(identifier, kind, payload)?;
        let _ = self
            .journal
            .append("DISPATCH", identifier, json!({"command": command}));
        Ok(command.id)
    }

    /// Fan a command out to every registered agent inside one critical
    /// section. Returns the (identifier, command id) pairs dispatched.
    pub fn enqueue_broadcast(&mut self, kind: &str, payload: &str) -> Vec<(String, i64)> {
        let mut identifiers: Vec<String> = self.clients.keys().cloned().collect();
        identifiers.sort();

        let mut dispatched = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            // Registered agents always have a queue
            if let Ok(command) =
                self.push_command(&identifier, kind.to_string(), payload.to_string())
            {
                let _ = self
                    .journal
                    .append("BROADCAST", &identifier, json!({"command": command}));
                dispatched.push((identifier, command.id));
            }
        }
        dispatched
    }

    /// Remove and return the command at the head of an agent's queue.
    ///
    /// `None` for an empty or unknown queue; delivery is at-most-once, so a
    /// returned command is gone from the daemon for good.
    pub fn poll_one(&mut self, identifier: &str) -> Option<QueuedCommand> {
        let command = self.pending.get_mut(identifier)?.pop_front();
        if let Some(command) = &command {
            debug!(identifier, command_id = command.id, "command delivered");
        }
        command
    }

    fn push_command(&mut self, identifier: &str, kind: String, payload: String) -> Result<QueuedCommand, StateError> {
        let queue = self
            .pending
            .get_mut(identifier)
            .ok_or_else(|| StateError::UnknownClient(identifier.to_string()))?;

        let command = QueuedCommand {
            id: Utc::now().timestamp(),
            kind,
            payload,
        };
        queue.push_back(command.clone());
        Ok(command)
    }
}
