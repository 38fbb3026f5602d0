//! Persistent session storage.
//!
//! A small async key-value abstraction with bulk writes, and [`SessionStore`]
//! which knows the session keys and their legacy aliases.

mod file;
mod memory;

pub use file::FileKeyValueStore;
pub use memory::MemoryKeyValueStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::models::UserProfile;
use crate::error::StorageError;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const ACCESS_TOKEN_ALIAS: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const REFRESH_TOKEN_ALIAS: &str = "refresh_token";
pub const USER_KEY: &str = "user";

/// Every key a session owns; cleared together.
pub const SESSION_KEYS: [&str; 5] = [
    ACCESS_TOKEN_KEY,
    ACCESS_TOKEN_ALIAS,
    REFRESH_TOKEN_KEY,
    REFRESH_TOKEN_ALIAS,
    USER_KEY,
];

/// Bulk operations must apply all-or-nothing.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError>;
    async fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError>;
}

/// Stored token pair as read back from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Session keys plus a generation counter.
///
/// The generation moves whenever a session is replaced or cleared, so work
/// started for an earlier session (a refresh, a profile save) can tell that
/// its result no longer belongs in storage. Writes are serialized so the
/// check and the write cannot interleave with a clear.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn KeyValueStore>,
    generation: Arc<AtomicU64>,
    writes: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner,
            generation: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::default()))
    }

    async fn get_with_alias(&self, key: &str, alias: &str) -> Result<Option<String>, StorageError> {
        if let Some(value) = self.inner.get_item(key).await? {
            return Ok(Some(value));
        }
        self.inner.get_item(alias).await
    }

    pub async fn access_token(&self) -> Result<Option<String>, StorageError> {
        self.get_with_alias(ACCESS_TOKEN_KEY, ACCESS_TOKEN_ALIAS).await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        self.get_with_alias(REFRESH_TOKEN_KEY, REFRESH_TOKEN_ALIAS).await
    }

    pub async fn tokens(&self) -> Result<StoredTokens, StorageError> {
        Ok(StoredTokens {
            access: self.access_token().await?,
            refresh: self.refresh_token().await?,
        })
    }

    /// Returns `None` for a missing or unreadable profile.
    pub async fn user(&self) -> Result<Option<UserProfile>, StorageError> {
        let Some(raw) = self.inner.get_item(USER_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<UserProfile>(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                log::warn!("Discarding unreadable cached profile: {}", e);
                Ok(None)
            }
        }
    }

    /// Writes both tokens, their aliases and optionally the profile in one bulk call.
    pub async fn save_session(
        &self,
        access: &str,
        refresh: &str,
        user: Option<&UserProfile>,
    ) -> Result<(), StorageError> {
        let serialized = user.map(serde_json::to_string).transpose()?;
        let mut items = vec![
            (ACCESS_TOKEN_KEY, access),
            (ACCESS_TOKEN_ALIAS, access),
            (REFRESH_TOKEN_KEY, refresh),
            (REFRESH_TOKEN_ALIAS, refresh),
        ];
        if let Some(user) = serialized.as_deref() {
            items.push((USER_KEY, user));
        }
        let _guard = self.writes.lock().await;
        self.bump_generation();
        self.inner.set_items(&items).await
    }

    /// Overwrites the access token only; the refresh token is untouched.
    pub async fn save_access_token(&self, access: &str) -> Result<(), StorageError> {
        let _guard = self.writes.lock().await;
        self.write_access_token(access).await
    }

    async fn write_access_token(&self, access: &str) -> Result<(), StorageError> {
        self.inner
            .set_items(&[(ACCESS_TOKEN_KEY, access), (ACCESS_TOKEN_ALIAS, access)])
            .await
    }

    /// Writes the access token only while `generation` is still current.
    /// Returns `false` when the session was replaced or cleared meanwhile.
    pub async fn save_access_token_if_current(
        &self,
        generation: u64,
        access: &str,
    ) -> Result<bool, StorageError> {
        let _guard = self.writes.lock().await;
        if self.generation() != generation {
            return Ok(false);
        }
        self.write_access_token(access).await?;
        Ok(true)
    }

    /// Overwrites the cached profile while `generation` is still current.
    pub async fn save_user_if_current(
        &self,
        generation: u64,
        user: &UserProfile,
    ) -> Result<bool, StorageError> {
        let serialized = serde_json::to_string(user)?;
        let _guard = self.writes.lock().await;
        if self.generation() != generation {
            return Ok(false);
        }
        self.inner.set_items(&[(USER_KEY, serialized.as_str())]).await?;
        Ok(true)
    }

    pub async fn clear_session(&self) -> Result<(), StorageError> {
        let _guard = self.writes.lock().await;
        self.bump_generation();
        self.inner.remove_items(&SESSION_KEYS).await
    }

    /// Clears only if no other session has been stored or cleared since
    /// `generation` was read.
    pub async fn clear_session_if_current(&self, generation: u64) -> Result<bool, StorageError> {
        let _guard = self.writes.lock().await;
        if self.generation() != generation {
            return Ok(false);
        }
        self.bump_generation();
        self.inner.remove_items(&SESSION_KEYS).await?;
        Ok(true)
    }
}
