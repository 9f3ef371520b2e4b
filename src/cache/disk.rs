//! Disk-persisted store backend.
//!
//! Layout under the store directory:
//! - `index.json` lists store names in creation order.
//! - `<digest>.json` holds one store, where `<digest>` is the first 16 hex
//!   chars of SHA-256 of the store name (names never touch the filesystem).
//!
//! All stores are loaded into a [`MemoryBackend`] mirror on open and every
//! mutation is written through. Files are replaced atomically via rename; a
//! mutation whose write fails leaves the mirror as it was.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::request::RequestKey;
use crate::response::Response;

use super::backend::{MemoryBackend, StoreBackend, StoreEntries};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    stores: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    name: String,
    entries: StoreEntries,
}

/// Write-through disk backend.
pub struct DiskBackend {
    dir: PathBuf,
    mirror: MemoryBackend,
    /// Serializes mutate-then-persist so files never lag behind each other.
    write_lock: Mutex<()>,
}

impl DiskBackend {
    /// Open (or create) a store directory and load every store in it.
    ///
    /// Corrupt store files are skipped with a warning and the store starts
    /// empty; an unreadable directory is an error.
    pub async fn open(dir: impl Into<PathBuf>, quota: Option<u64>) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let mirror = match quota {
            Some(bytes) => MemoryBackend::with_quota(bytes),
            None => MemoryBackend::new(),
        };

        let index = load_index(&dir.join(INDEX_FILE)).await?;
        for name in &index.stores {
            let path = dir.join(store_file_name(name));
            let entries = match tokio::fs::read(&path).await {
                Ok(data) => match serde_json::from_slice::<StoreFile>(&data) {
                    Ok(file) if file.name == *name => file.entries,
                    Ok(file) => {
                        warn!(store = %name, found = %file.name, "Store file name mismatch, starting empty");
                        StoreEntries::new()
                    }
                    Err(e) => {
                        warn!(store = %name, "Store file is corrupt, starting empty: {}", e);
                        StoreEntries::new()
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreEntries::new(),
                Err(e) => return Err(CacheError::Io(e)),
            };
            debug!(store = %name, entries = entries.len(), "Loaded store from disk");
            mirror.restore(name, entries)?;
        }

        Ok(Self {
            dir,
            mirror,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_store(&self, name: &str, entries: StoreEntries) -> Result<(), CacheError> {
        let file = StoreFile {
            name: name.to_string(),
            entries,
        };
        let data = serde_json::to_vec(&file).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        write_atomic(&self.dir.join(store_file_name(name)), &data).await
    }

    async fn write_index(&self, stores: Vec<String>) -> Result<(), CacheError> {
        let data = serde_json::to_vec_pretty(&IndexFile { stores })
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        write_atomic(&self.dir.join(INDEX_FILE), &data).await
    }

    /// Write the mirror's copy of `name`, plus the index when the store is new.
    async fn persist_store(&self, name: &str, created: bool) -> Result<(), CacheError> {
        let entries = self.mirror.snapshot(name)?.unwrap_or_default();
        self.write_store(name, entries).await?;
        if created {
            if let Err(e) = self.write_index(self.mirror.names_sync()?).await {
                let _ = tokio::fs::remove_file(self.dir.join(store_file_name(name))).await;
                return Err(e);
            }
        }
        Ok(())
    }
}
fn store_file_name(name: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    format!("{}.json", &digest[..16])
}

async fn load_index(path: &Path) -> Result<IndexFile, CacheError> {
    match tokio::fs::read(path).await {
        Ok(data) => match serde_json::from_slice(&data) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!("Store index is corrupt, starting empty: {}", e);
                Ok(IndexFile::default())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexFile::default()),
        Err(e) => Err(CacheError::Io(e)),
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CacheError::Io(e));
    }
    Ok(())
}

#[async_trait]
impl StoreBackend for DiskBackend {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        if self.mirror.has(name).await? {
            return Ok(());
        }
        self.write_store(name, StoreEntries::new()).await?;
        let mut stores = self.mirror.names_sync()?;
        stores.push(name.to_string());
        self.write_index(stores).await?;
        self.mirror.open_sync(name)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.mirror.has(name).await
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<Response>, CacheError> {
        self.mirror.get(name, key).await
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let created = !self.mirror.has(name).await?;
        let previous = self.mirror.get(name, &key).await?;
        self.mirror.put_sync(name, key.clone(), response)?;
        if let Err(e) = self.persist_store(name, created).await {
            warn!(store = %name, "Store write failed, reverting: {}", e);
            self.mirror.revert_put(name, &key, previous, created)?;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, name: &str, key: &RequestKey) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.mirror.get(name, key).await?;
        if !self.mirror.remove_sync(name, key)? {
            return Ok(false);
        }
        if let Err(e) = self.persist_store(name, false).await {
            warn!(store = %name, "Store write failed, reverting: {}", e);
            self.mirror.revert_put(name, key, previous, false)?;
            return Err(e);
        }
        Ok(true)
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        self.mirror.keys(name).await
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        self.mirror.names().await
    }

    /// The index is the commit point: once it no longer lists `name` the
    /// store is gone, and a leftover file is never loaded again.
    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().await;
        if !self.mirror.has(name).await? {
            return Ok(false);
        }
        let mut stores = self.mirror.names_sync()?;
        stores.retain(|n| n != name);
        self.write_index(stores).await?;
        match tokio::fs::remove_file(self.dir.join(store_file_name(name))).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(store = %name, "Could not remove store file: {}", e),
        }
        self.mirror.delete_sync(name)
    }

    async fn usage(&self) -> Result<u64, CacheError> {
        self.mirror.usage().await
    }
}
