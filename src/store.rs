//! Bulk storage for offloaded payloads.
//!
//! Channels whose transport has a message-size ceiling park oversized
//! payloads in a [`BulkStore`] and send a reference envelope instead.
//! [`MemoryBulkStore`] backs tests and single-process deployments;
//! [`FsBulkStore`] persists objects under a local directory.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Keyed byte storage with container/key addressing.
///
/// Object-safe so channels can share one store as `Arc<dyn BulkStore>`.
#[async_trait]
pub trait BulkStore: Send + Sync {
    /// Store `bytes` at `container`/`key`, creating the container as needed.
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch the object at `container`/`key`.
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>>;

    /// Whether an object exists at `container`/`key`.
    async fn contains(&self, container: &str, key: &str) -> Result<bool>;
}

/// In-memory bulk store.
#[derive(Debug, Default)]
pub struct MemoryBulkStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBulkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, across all containers.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BulkStore for MemoryBulkStore {
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert((container.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::BulkObjectMissing {
                container: container.to_string(),
                key: key.to_string(),
            })
    }

    async fn contains(&self, container: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(container.to_string(), key.to_string())))
    }
}

/// Filesystem bulk store. Containers map to subdirectories of `root`.
#[derive(Debug, Clone)]
pub struct FsBulkStore {
    root: PathBuf,
}

impl FsBulkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, container: &str, key: &str) -> PathBuf {
        self.root.join(container).join(key)
    }
}

#[async_trait]
impl BulkStore for FsBulkStore {
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        let dir = self.root.join(container);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(self.object_path(container, key), bytes).await?;
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.object_path(container, key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::BulkObjectMissing {
                    container: container.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, container: &str, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.object_path(container, key)).await?)
    }
}
