//! Delivery cache: maps a delivered source+variant to the host's file reference.
//!
//! Reads hit an in-process map first and fall back to a durable key/value
//! store. Entries are never evicted; published content is treated as
//! immutable. Backing-store failures degrade to a miss and are logged.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::models::MediaKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("store data is corrupt: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Simple durable string key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Cache sub-key distinguishing forms of the same source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variant {
    Image,
    Video,
    Audio,
    /// Platform specific form, e.g. one slot of a multi-item post
    Native(String),
}

impl Variant {
    pub fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Photo => Self::Image,
            MediaKind::Video => Self::Video,
            MediaKind::Audio => Self::Audio,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Native(name) => write!(f, "{}", name),
        }
    }
}

/// A previously delivered file the host can re-send by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMedia {
    pub file_ref: String,
    pub caption: String,
}

/// Shared, cheaply clonable cache handle.
#[derive(Clone)]
pub struct DeliveryCache {
    fast: Arc<RwLock<HashMap<String, CachedMedia>>>,
    store: Arc<dyn KeyValueStore>,
}

impl DeliveryCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            fast: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    /// Cache backed only by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    fn key(source_id: &str, variant: &Variant) -> String {
        format!("{}:{}", source_id, variant)
    }

    pub async fn get(&self, source_id: &str, variant: &Variant) -> Option<CachedMedia> {
        let key = Self::key(source_id, variant);
        let cached = self.fast.read().get(&key).cloned();
        if let Some(hit) = cached {
            debug!(key = %key, "cache hit (memory)");
            return Some(hit);
        }

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache store read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CachedMedia>(&raw) {
            Ok(entry) => {
                debug!(key = %key, "cache hit (store)");
                self.fast.write().insert(key, entry.clone());
                Some(entry)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache entry unreadable, treating as miss");
                None
            }
        }
    }

    /// Record a delivery. Store failures are logged and otherwise ignored.
    pub async fn set(&self, source_id: &str, variant: &Variant, file_ref: &str, caption: &str) {
        let key = Self::key(source_id, variant);
        let entry = CachedMedia {
            file_ref: file_ref.to_string(),
            caption: caption.to_string(),
        };
        self.fast.write().insert(key.clone(), entry.clone());

        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "couldn't encode cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &encoded).await {
            warn!(key = %key, error = %e, "couldn't persist cache entry");
        }
    }
}

/// Process-local store, used in tests and when no path is configured.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file holding a flat string map. Rewritten atomically on each set.
pub struct JsonFileStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<Option<HashMap<String, String>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        let encoded =
            serde_json::to_vec_pretty(entries).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let target = self.path.clone();

        // Write next to the target, then rename over it
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&encoded)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(io_err)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|m| m.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let entries = guard.get_or_insert_with(HashMap::new);
        entries.insert(key.to_string(), value.to_string());
        self.persist(entries).await
    }
}
