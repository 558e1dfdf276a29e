use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::extract::default_workers;
use crate::ingest::ImportOptions;
use crate::loader::{DEFAULT_BATCH_SIZE, LoadOptions};
use crate::storage::StorageOptions;

/// Runtime settings. Every field is optional on disk:
/// ```json
/// {
///   "bind_addr": "0.0.0.0:5000",
///   "max_connections": 16,
///   "batch_size": 20000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    /// Where a running query service is reached for health checks and reloads.
    pub server_url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub busy_timeout_secs: u64,
    pub batch_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            server_url: "http://127.0.0.1:5000".to_string(),
            max_connections: 8,
            acquire_timeout_secs: 10,
            busy_timeout_secs: 5,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            max_connections: self.max_connections.max(1),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            batch_size: self.batch_size.max(1),
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            storage: self.storage_options(),
            load: self.load_options(),
            max_workers: default_workers(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "bind_addr": "0.0.0.0:8080", "batch_size": 100 }"#).unwrap();

        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.bind_addr, "0.0.0.0:8080");
        assert_eq!(settings.load_options().batch_size, 100);
        assert_eq!(settings.max_connections, 8);
        assert_eq!(settings.storage_options().busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        assert_eq!(Settings::load_or_default(None).unwrap(), Settings::default());
    }

    #[test]
    fn test_unreadable_or_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(&dir.path().join("absent.json")).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
