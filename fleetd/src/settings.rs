//! Daemon settings loaded from `fleetd.toml`.
//!
//! A missing or unparsable file degrades to defaults with a warning; the
//! daemon must come up even with no configuration on disk.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    journal_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            journal_path: None,
        }
    }
}

impl Settings {
    /// Journal location; defaults to `<data_dir>/commands.journal`.
    pub fn journal_path(&self) -> PathBuf {
        self.journal_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("commands.journal"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    journal: JournalSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct JournalSection {
    path: Option<PathBuf>,
}

pub fn load_settings(config_path: Option<&Path>) -> Settings {
    let Some(path) = config_path else {
        return Settings::default();
    };

    let contents = match std::fs::read_to_string(path) {
        Ok(value) => value,
        Err(err) => {
            warn!("Failed to read config file {}: {}", path.display(), err);
            return Settings::default();
        }
    };

    let parsed: ConfigFile = match toml::from_str(&contents) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!("Failed to parse {}: {}", path.display(), err);
            return Settings::default();
        }
    };

    let defaults = Settings::default();
    let settings = Settings {
        host: parsed.server.host.unwrap_or(defaults.host),
        port: parsed.server.port.unwrap_or(defaults.port),
        data_dir: parsed.storage.data_dir.unwrap_or(defaults.data_dir),
        journal_path: parsed.journal.path,
    };

    info!("Loaded settings from {}", path.display());
    settings
}
