//! Pluggable persistence
//!
//! The session layer persists through an opaque async key-value map. Two
//! key families exist: [`METADATA_KEY`] holds the listing record (small,
//! rewritten on every lightweight action) and `session-<id>` holds one
//! session's full content (larger, rewritten only when content changes).
//! Values are JSON text; the session layer owns the serialization.

use crate::error::{QuillError, QuillResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Key of the workspace-wide listing record
pub const METADATA_KEY: &str = "session-metadata";

/// Key of one session's full content blob
pub fn session_key(id: &Uuid) -> String {
    format!("session-{id}")
}

/// Async string-keyed blob store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> QuillResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> QuillResult<()>;
    async fn del(&self, key: &str) -> QuillResult<()>;
}

/// In-memory store for tests and ephemeral embedding
#[derive(Default)]
pub struct MemoryKvStore {
    entries: tokio::sync::RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> QuillResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> QuillResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> QuillResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a root directory
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store location under the platform data directory
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
            .join("sessions")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are library-generated, but never trust them as raw paths
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    async fn ensure_root(&self) -> QuillResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            QuillError::storage(format!(
                "failed to create store directory {}: {e}",
                self.root.display()
            ))
        })
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> QuillResult<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QuillError::storage_key(
                format!("failed to read {}: {e}", path.display()),
                key,
            )),
        }
    }

    async fn set(&self, key: &str, value: String) -> QuillResult<()> {
        self.ensure_root().await?;
        let path = self.path_for(key);
        tokio::fs::write(&path, value).await.map_err(|e| {
            QuillError::storage_key(format!("failed to write {}: {e}", path.display()), key)
        })?;
        debug!(key, "wrote blob");
        Ok(())
    }

    async fn del(&self, key: &str) -> QuillResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QuillError::storage_key(
                format!("failed to delete {}: {e}", path.display()),
                key,
            )),
        }
    }
}
