//! A JSON file used as a string keyed store of JSON values.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Value stored under `key`, or `default` when the file or key is
    /// missing. Unreadable or corrupt data also falls back to `default`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let entries = match self.read_all() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Error loading {} from {}: {:#}", key, self.path.display(), e);
                return default;
            }
        };

        match entries.get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!("Error loading {} from {}: {}", key, self.path.display(), e);
                    default
                }
            },
            None => default,
        }
    }

    /// Store `value` under `key`. Other keys are preserved.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        // A corrupt file is replaced rather than blocking every write
        let mut entries = self.read_all().unwrap_or_default();
        entries.insert(key.to_string(), serde_json::to_value(value)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to save {}", self.path.display()))?;
        Ok(())
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}
