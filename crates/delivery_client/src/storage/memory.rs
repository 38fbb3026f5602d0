use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KeyValueStore;
use crate::error::StorageError;

/// Non-persistent store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut guard = self.items.write().await;
        for (key, value) in items {
            guard.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    async fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut guard = self.items.write().await;
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }
}
