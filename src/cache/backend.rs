//! Store backends: the persistence layer under [`super::CacheStorage`].

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::CacheError;
use crate::request::RequestKey;
use crate::response::Response;

/// Entries of a single named store, ordered by key.
pub type StoreEntries = BTreeMap<RequestKey, Response>;

/// Named key→response stores.
///
/// Reads of a missing store behave like an empty store; writes create it.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Create `name` if it does not exist.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<Response>, CacheError>;

    /// Insert or replace the entry under `key`.
    async fn put(&self, name: &str, key: RequestKey, response: Response)
        -> Result<(), CacheError>;

    /// Remove a single entry. Returns whether it existed.
    async fn remove(&self, name: &str, key: &RequestKey) -> Result<bool, CacheError>;

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError>;

    /// Store names in creation order.
    async fn names(&self) -> Result<Vec<String>, CacheError>;

    /// Drop a whole store. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Total bytes held across all stores.
    async fn usage(&self) -> Result<u64, CacheError>;
}

#[derive(Default)]
struct MemoryState {
    order: Vec<String>,
    stores: HashMap<String, StoreEntries>,
    bytes: u64,
}

impl MemoryState {
    fn ensure(&mut self, name: &str) -> &mut StoreEntries {
        if !self.stores.contains_key(name) {
            debug!(store = %name, "Creating store");
            self.order.push(name.to_string());
        }
        self.stores.entry(name.to_string()).or_default()
    }
}

/// In-process backend guarded by a `RwLock`. Optionally enforces a byte quota.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    quota: Option<u64>,
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("store lock poisoned".into())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that rejects writes once `bytes` would be exceeded.
    pub fn with_quota(bytes: u64) -> Self {
        Self {
            state: RwLock::default(),
            quota: Some(bytes),
        }
    }

    pub(crate) fn open_sync(&self, name: &str) -> Result<(), CacheError> {
        self.state.write().map_err(poisoned)?.ensure(name);
        Ok(())
    }

    pub(crate) fn put_sync(
        &self,
        name: &str,
        key: RequestKey,
        mut response: Response,
    ) -> Result<(), CacheError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let replaced = state
            .stores
            .get(name)
            .and_then(|entries| entries.get(&key))
            .map(Response::size)
            .unwrap_or(0);
        let needed = state.bytes - replaced + response.size();
        if let Some(limit) = self.quota {
            if needed > limit {
                return Err(CacheError::QuotaExceeded { needed, limit });
            }
        }
        response.stored_at = Some(Utc::now());
        state.ensure(name).insert(key, response);
        state.bytes = needed;
        Ok(())
    }

    pub(crate) fn remove_sync(&self, name: &str, key: &RequestKey) -> Result<bool, CacheError> {
        let mut state = self.state.write().map_err(poisoned)?;
        let removed = state
            .stores
            .get_mut(name)
            .and_then(|entries| entries.remove(key));
        match removed {
            Some(resp) => {
                state.bytes -= resp.size();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn delete_sync(&self, name: &str) -> Result<bool, CacheError> {
        let mut state = self.state.write().map_err(poisoned)?;
        match state.stores.remove(name) {
            Some(entries) => {
                let freed: u64 = entries.values().map(Response::size).sum();
                state.bytes -= freed;
                state.order.retain(|n| n != name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Undo a `put_sync`: put back the entry it replaced, or drop the store
    /// it created.
    pub(crate) fn revert_put(
        &self,
        name: &str,
        key: &RequestKey,
        previous: Option<Response>,
        created: bool,
    ) -> Result<(), CacheError> {
        if created {
            self.delete_sync(name)?;
            return Ok(());
        }
        let mut state = self.state.write().map_err(poisoned)?;
        let Some(entries) = state.stores.get_mut(name) else {
            return Ok(());
        };
        let (added, dropped) = match previous {
            Some(prev) => (prev.size(), entries.insert(key.clone(), prev)),
            None => (0, entries.remove(key)),
        };
        state.bytes = state.bytes + added - dropped.as_ref().map(Response::size).unwrap_or(0);
        Ok(())
    }

    /// Copy of one store's entries, `None` if the store does not exist.
    pub(crate) fn snapshot(&self, name: &str) -> Result<Option<StoreEntries>, CacheError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.stores.get(name).cloned())
    }

    /// Install a store loaded from elsewhere, replacing any existing one.
    pub(crate) fn restore(&self, name: &str, entries: StoreEntries) -> Result<(), CacheError> {
        self.delete_sync(name)?;
        let mut state = self.state.write().map_err(poisoned)?;
        let added: u64 = entries.values().map(Response::size).sum();
        *state.ensure(name) = entries;
        state.bytes += added;
        Ok(())
    }

    pub(crate) fn names_sync(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.state.read().map_err(poisoned)?.order.clone())
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.open_sync(name)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.state.read().map_err(poisoned)?.stores.contains_key(name))
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<Response>, CacheError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .stores
            .get(name)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        self.put_sync(name, key, response)
    }

    async fn remove(&self, name: &str, key: &RequestKey) -> Result<bool, CacheError> {
        self.remove_sync(name, key)
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .stores
            .get(name)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        self.names_sync()
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.delete_sync(name)
    }

    async fn usage(&self) -> Result<u64, CacheError> {
        Ok(self.state.read().map_err(poisoned)?.bytes)
    }
}
