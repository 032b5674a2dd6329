//! Manager configuration.

use crate::error::{Result, StoreError};
use crate::store::LogStore;
use crate::subscriptions::SubscriptionConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Record manager configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding store files. Created on open if missing.
    pub data_dir: PathBuf,

    /// Sync the store file every N writes (1 = every write).
    pub sync_interval: u64,

    /// Defaults for `RecordManager::subscribe`.
    pub subscription: SubscriptionConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sync_interval: LogStore::DEFAULT_SYNC_INTERVAL,
            subscription: SubscriptionConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Config with everything default except the data directory.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Resolve a storage identifier to a file inside `data_dir`.
    ///
    /// The identifier must be a plain file name.
    pub fn resolve(&self, storage_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(storage_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.data_dir.join(storage_id)),
            _ => Err(StoreError::InvalidLocation(format!(
                "storage id must be a plain file name, got {:?}",
                storage_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve() {
        let config = ManagerConfig::in_dir("/tmp/contacts");
        assert_eq!(
            config.resolve("people.db").unwrap(),
            PathBuf::from("/tmp/contacts/people.db")
        );

        for bad in ["", "..", "a/b", "/abs", "."] {
            assert!(
                matches!(config.resolve(bad), Err(StoreError::InvalidLocation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "data_dir": "/var/lib/contacts", "subscription": { "replay_latest": true } }"#,
        )
        .unwrap();

        let config = ManagerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/contacts"));
        assert_eq!(config.sync_interval, 1);
        assert!(config.subscription.replay_latest);
        assert_eq!(config.subscription.buffer_size, 64);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            ManagerConfig::from_json_file(&path),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            ManagerConfig::from_json_file(dir.path().join("missing.json")),
            Err(StoreError::Io(_))
        ));
    }
}
