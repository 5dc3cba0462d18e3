//! Durable storage for registrations, data snapshots, execution reports and
//! decoded screenshot artifacts.
//!
//! One JSON file per registration, timestamp-suffixed JSON files per
//! data/report event so later reports never overwrite earlier ones, and one
//! binary file per decoded artifact under a per-agent directory. All writes
//! happen outside the registry guard.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use fleet_common::AgentRecord;
use serde_json::Value;
use tokio::fs;

const SCREENSHOT_DIR: &str = "screenshots";

pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", self.data_dir.display()))
    }

    /// One file per registration event, keyed by the identifier alone; a
    /// colliding re-registration overwrites it, matching the registry.
    pub async fn persist_registration(&self, identifier: &str, record: &AgentRecord) -> Result<PathBuf> {
        let path = self.data_dir.join(format!("{identifier}.json"));
        self.write_json(&path, &serde_json::to_value(record)?).await?;
        Ok(path)
    }

    /// Timestamp-suffixed snapshot of an agent's `/data` submission.
    pub async fn persist_snapshot(&self, identifier: &str, data: &Value) -> Result<PathBuf> {
        let path = self
            .data_dir
            .join(format!("{identifier}_data_{}.json", file_stamp()));
        self.write_json(&path, data).await?;
        Ok(path)
    }

    /// Timestamp-suffixed execution report. Persisted unconditionally;
    /// reporting is decoupled from registration state.
    pub async fn persist_report(&self, identifier: &str, report: &Value) -> Result<PathBuf> {
        let path = self
            .data_dir
            .join(format!("{identifier}_report_{}.json", file_stamp()));
        self.write_json(&path, report).await?;
        Ok(path)
    }

    /// Decode a base64 artifact payload and write the bytes under the
    /// agent's screenshot directory. The payload may carry a data-URI
    /// header, which is stripped up to the first comma.
    pub async fn store_artifact(&self, identifier: &str, payload: &str) -> Result<PathBuf> {
        let encoded = payload
            .split_once(',')
            .map(|(_, rest)| rest)
            .unwrap_or(payload);
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .context("artifact payload is not valid base64")?;

        let dir = self.data_dir.join(SCREENSHOT_DIR).join(identifier);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;

        let path = dir.join(format!("{}.png", file_stamp()));
        fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        Ok(path)
    }

    async fn write_json(&self, path: &Path, value: &Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn file_stamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
