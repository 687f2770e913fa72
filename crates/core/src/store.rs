//! Asynchronous key/value persistence shared by the segment cache and the
//! enabled flag.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use crate::error::{Result, SkipperError};

const ENABLED_KEY: &str = "enabled";

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the subset of `keys` that have a stored value.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.entries.lock().map_err(|_| SkipperError::StoreFailed {
            reason: "memory store poisoned".to_string(),
        })
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let entries = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        self.lock()?.extend(entries);
        Ok(())
    }
}

/// Whole-map JSON file, rewritten on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, Value>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let mut all = self.load().await?;
        Ok(keys
            .iter()
            .filter_map(|k| all.remove(*k).map(|v| (k.to_string(), v)))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load().await?;
        all.extend(entries);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&all)?).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), entries = all.len(), "store written");
        Ok(())
    }
}

/// User-facing switches read from the store on every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Settings {
    /// Missing or non-boolean values count as enabled.
    pub async fn load(store: &dyn KvStore) -> Result<Self> {
        let values = store.get(&[ENABLED_KEY]).await?;
        let enabled = values
            .get(ENABLED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(Self { enabled })
    }

    pub async fn save(&self, store: &dyn KvStore) -> Result<()> {
        store
            .set(HashMap::from([(
                ENABLED_KEY.to_string(),
                Value::Bool(self.enabled),
            )]))
            .await
    }
}

pub fn default_store_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("skipper")
        .join("store.json")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn memory_store_returns_only_known_keys() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store
            .set(HashMap::from([("a".to_string(), json!(1))]))
            .await?;

        let values = store.get(&["a", "b"]).await?;
        assert_eq!(values.len(), 1);
        assert_eq!(values["a"], json!(1));
        Ok(())
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("store.json");

        JsonFileStore::new(&path)
            .set(HashMap::from([("bvid-BV1xx411c7mD".to_string(), json!({"start": 1.0, "end": 2.0}))]))
            .await?;
        JsonFileStore::new(&path)
            .set(HashMap::from([("enabled".to_string(), json!(false))]))
            .await?;

        let reopened = JsonFileStore::new(&path);
        let values = reopened.get(&["bvid-BV1xx411c7mD", "enabled"]).await?;
        assert_eq!(values["bvid-BV1xx411c7mD"]["end"], json!(2.0));
        assert_eq!(values["enabled"], json!(false));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.get(&["anything"]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn settings_default_to_enabled() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert!(Settings::load(&store).await?.enabled);

        Settings { enabled: false }.save(&store).await?;
        assert!(!Settings::load(&store).await?.enabled);
        Ok(())
    }
}
