use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use gru_glue_core::HostError;

use crate::config::StorageConfig;

/// The `localStorage` object handed to the guest. Reads and writes go to the
/// [`Storage`] in the host state.
#[derive(Debug, Default)]
pub struct LocalStorage;

/// `localStorage` contents, optionally persisted as a JSON object.
pub struct Storage {
    items: BTreeMap<String, String>,
    quota: usize,
    file: Option<PathBuf>,
}

fn units(s: &str) -> usize {
    s.encode_utf16().count()
}

impl Storage {
    pub fn in_memory(quota: usize) -> Self {
        Self {
            items: BTreeMap::new(),
            quota,
            file: None,
        }
    }

    /// Open the configured store, loading the persistence file if it exists.
    pub fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        let mut storage = Self::in_memory(config.quota);
        if let Some(path) = &config.file {
            if path.exists() {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                storage.items = serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?;
                log::debug!("loaded {} storage item(s) from {}", storage.items.len(), path.display());
            }
            storage.file = Some(path.clone());
        }
        Ok(storage)
    }

    pub fn get_item(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Store `value` under `key`, keeping the total within the quota.
    pub fn set_item(&mut self, key: &str, value: &str) -> Result<(), HostError> {
        let current = self
            .items
            .get(key)
            .map_or(0, |old| units(key) + units(old));
        let needed = self.usage() - current + units(key) + units(value);
        if needed > self.quota {
            return Err(HostError::quota_exceeded(format!(
                "setting `{key}` would use {needed} of {} units",
                self.quota
            )));
        }
        self.items.insert(key.to_string(), value.to_string());
        self.persist();
        Ok(())
    }

    pub fn remove_item(&mut self, key: &str) {
        if self.items.remove(key).is_some() {
            self.persist();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Size in UTF-16 code units of all keys and values.
    pub fn usage(&self) -> usize {
        self.items.iter().map(|(k, v)| units(k) + units(v)).sum()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(&self.items)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            log::warn!("localStorage not persisted: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_counts_utf16_units() {
        let mut storage = Storage::in_memory(10);
        storage.set_item("k", "ééé").unwrap();
        assert_eq!(storage.usage(), 4);
        let err = storage.set_item("big", "12345678").unwrap_err();
        assert_eq!(err.name, "QuotaExceededError");
        // Replacing a value only counts the difference.
        storage.set_item("k", "123456789").unwrap();
        assert_eq!(storage.get_item("k"), Some("123456789"));
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            file: Some(dir.path().join("nested").join("storage.json")),
            quota: 1024,
        };
        let mut storage = Storage::open(&config).unwrap();
        storage.set_item("settings", "{\"volume\":3}").unwrap();

        let reopened = Storage::open(&config).unwrap();
        assert_eq!(reopened.get_item("settings"), Some("{\"volume\":3}"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();
        let config = StorageConfig {
            file: Some(path),
            quota: 1024,
        };
        assert!(Storage::open(&config).is_err());
    }
}
