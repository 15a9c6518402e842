//! Durable credential and profile storage.
//!
//! The client only needs a get/save/remove capability; where the data lives is
//! up to the owner. Two implementations ship with the crate:
//!
//! - [`MemoryTokenStore`] / [`MemoryProfileStore`] for tests and short-lived processes
//! - [`JsonFileStore`] persisting both the pair and the profile to one JSON file

use crate::error::{ClientError, Result};
use crate::types::CredentialPair;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Persistent storage for the credential pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the stored pair.
    async fn get(&self) -> Result<Option<CredentialPair>>;

    /// Replace the stored pair.
    async fn save(&self, pair: &CredentialPair) -> Result<()>;

    /// Forget the stored pair.
    async fn remove(&self) -> Result<()>;
}

/// Persistent storage for the signed-in user's profile blob.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Load the stored profile.
    async fn get_profile(&self) -> Result<Option<serde_json::Value>>;

    /// Replace the stored profile.
    async fn save_profile(&self, profile: &serde_json::Value) -> Result<()>;

    /// Forget the stored profile.
    async fn remove_profile(&self) -> Result<()>;
}

/// Token store held in process memory.
///
/// Clones share the same slot.
///
/// ```
/// use authed_http::{CredentialPair, MemoryTokenStore, TokenStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryTokenStore::new();
/// store.save(&CredentialPair::new("a1", "r1")).await.unwrap();
/// assert_eq!(store.clone().get().await.unwrap(), Some(CredentialPair::new("a1", "r1")));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    pair: Arc<Mutex<Option<CredentialPair>>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `pair`.
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Arc::new(Mutex::new(Some(pair))),
        }
    }

    /// Synchronous peek, for assertions.
    pub fn snapshot(&self) -> Option<CredentialPair> {
        self.pair.lock().clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<CredentialPair>> {
        Ok(self.pair.lock().clone())
    }

    async fn save(&self, pair: &CredentialPair) -> Result<()> {
        *self.pair.lock() = Some(pair.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        *self.pair.lock() = None;
        Ok(())
    }
}

/// Profile store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProfileStore {
    profile: Arc<Mutex<Option<serde_json::Value>>>,
}

impl MemoryProfileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek, for assertions.
    pub fn snapshot(&self) -> Option<serde_json::Value> {
        self.profile.lock().clone()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self) -> Result<Option<serde_json::Value>> {
        Ok(self.profile.lock().clone())
    }

    async fn save_profile(&self, profile: &serde_json::Value) -> Result<()> {
        *self.profile.lock() = Some(profile.clone());
        Ok(())
    }

    async fn remove_profile(&self) -> Result<()> {
        *self.profile.lock() = None;
        Ok(())
    }
}

/// On-disk layout of [`JsonFileStore`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<CredentialPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile: Option<serde_json::Value>,
}

/// Token and profile store backed by a JSON file.
///
/// Writes go to a unique temp file that is then renamed over the target, so a
/// crash mid-write never leaves a truncated session file. All access from one
/// process is serialized by an async mutex.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonFileStore {
    /// Store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<PersistedSession> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::Storage(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedSession::default()),
            Err(e) => Err(ClientError::Storage(e.to_string())),
        }
    }

    async fn write(&self, session: &PersistedSession) -> Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = serde_json::to_vec_pretty(session)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))
    }

    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut PersistedSession) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut session = self.load().await?;
        f(&mut session);
        self.write(&session).await
    }
}

#[async_trait]
impl TokenStore for JsonFileStore {
    async fn get(&self) -> Result<Option<CredentialPair>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.credentials)
    }

    async fn save(&self, pair: &CredentialPair) -> Result<()> {
        let pair = pair.clone();
        self.update(move |s| s.credentials = Some(pair)).await
    }

    async fn remove(&self) -> Result<()> {
        self.update(|s| s.credentials = None).await
    }
}

#[async_trait]
impl ProfileStore for JsonFileStore {
    async fn get_profile(&self) -> Result<Option<serde_json::Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.profile)
    }

    async fn save_profile(&self, profile: &serde_json::Value) -> Result<()> {
        let profile = profile.clone();
        self.update(move |s| s.profile = Some(profile)).await
    }

    async fn remove_profile(&self) -> Result<()> {
        self.update(|s| s.profile = None).await
    }
}
