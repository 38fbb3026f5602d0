use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::error::StorageError;

/// JSON-file backed store.
///
/// Every bulk write produces a complete new file, written to a sibling temp
/// file and renamed over the old one, so a failed write leaves the previous
/// contents in place.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    // None until first access
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileKeyValueStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let serialized = serde_json::to_string_pretty(items)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized).await?;
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Applies `change` to a copy of the current map and commits it only if
    /// the file write succeeds.
    async fn update<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut guard = self.cache.lock().await;
        let current = match guard.as_ref() {
            Some(items) => items.clone(),
            None => self.load().await?,
        };
        let mut next = current.clone();
        change(&mut next);
        if next == current && guard.is_some() {
            return Ok(());
        }
        self.persist(&next).await?;
        *guard = Some(next);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|items| items.get(key).cloned()))
    }

    async fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError> {
        self.update(|map| {
            for (key, value) in items {
                map.insert((*key).to_string(), (*value).to_string());
            }
        })
        .await
    }

    async fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.update(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
        .await
    }
}
