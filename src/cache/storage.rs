//! Store Manager: named, versioned stores over a [`StoreBackend`].

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::network::{FetchOptions, Network};
use crate::request::{ProxyRequest, RequestKey};
use crate::response::Response;

use super::backend::{MemoryBackend, StoreBackend};
use super::policy::CachePolicy;

/// Lookup options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Compare URLs with their query strings removed.
    pub ignore_query: bool,
}

impl MatchOptions {
    pub fn ignoring_query() -> Self {
        Self { ignore_query: true }
    }
}

/// One URL that population could not store.
#[derive(Debug, Clone, Serialize)]
pub struct PopulationFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of [`CacheStorage::add_all`]. Each key is reported independently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PopulationReport {
    pub store: String,
    pub stored: Vec<String>,
    pub failed: Vec<PopulationFailure>,
}

impl PopulationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entry count for one store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    pub name: String,
    pub entries: usize,
}

/// Handle to a single named store, returned by [`CacheStorage::open`].
#[derive(Clone)]
pub struct Store {
    name: String,
    storage: CacheStorage,
}

impl Store {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(
        &self,
        request: &ProxyRequest,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        self.storage
            .match_request(Some(&self.name), request, options)
            .await
    }

    pub async fn put(&self, request: &ProxyRequest, response: Response) -> Result<(), CacheError> {
        self.storage.put(&self.name, request, response).await
    }

    pub async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
        self.storage.backend.keys(&self.name).await
    }

    pub async fn remove(&self, request: &ProxyRequest) -> Result<bool, CacheError> {
        self.storage.backend.remove(&self.name, &request.key()).await
    }

    pub async fn add_all(
        &self,
        network: &dyn Network,
        requests: Vec<ProxyRequest>,
        policy: &CachePolicy,
    ) -> PopulationReport {
        self.storage
            .add_all(&self.name, network, requests, policy)
            .await
    }
}

/// Façade over a backend. Cheap to clone.
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn StoreBackend>,
}

impl CacheStorage {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open `name`, creating it if needed.
    pub async fn open(&self, name: &str) -> Result<Store, CacheError> {
        self.backend.open(name).await?;
        Ok(Store {
            name: name.to_string(),
            storage: self.clone(),
        })
    }

    /// Find a stored response for `request`.
    ///
    /// With `name` set only that store is searched, otherwise every store in
    /// creation order.
    pub async fn match_request(
        &self,
        name: Option<&str>,
        request: &ProxyRequest,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        self.match_key(name, &request.key(), options).await
    }

    pub async fn match_key(
        &self,
        name: Option<&str>,
        key: &RequestKey,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        let names = match name {
            Some(n) => vec![n.to_string()],
            None => self.backend.names().await?,
        };
        Ok(self
            .match_in(&names, key, options)
            .await?
            .map(|(_, found)| found))
    }

    /// Search an ordered list of stores, first hit wins. Returns the name of
    /// the store that answered alongside the response.
    pub async fn match_in(
        &self,
        names: &[String],
        key: &RequestKey,
        options: MatchOptions,
    ) -> Result<Option<(String, Response)>, CacheError> {
        for store in names {
            if let Some(found) = self.lookup(store, key, options).await? {
                return Ok(Some((store.clone(), found)));
            }
        }
        Ok(None)
    }

    async fn lookup(
        &self,
        store: &str,
        key: &RequestKey,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        if let Some(found) = self.backend.get(store, key).await? {
            return Ok(Some(found));
        }
        if !options.ignore_query {
            return Ok(None);
        }
        let wanted = key.without_query();
        for candidate in self.backend.keys(store).await? {
            if candidate.without_query() == wanted {
                return self.backend.get(store, &candidate).await;
            }
        }
        Ok(None)
    }

    /// Store `response` under `request`, replacing any existing entry.
    pub async fn put(
        &self,
        name: &str,
        request: &ProxyRequest,
        response: Response,
    ) -> Result<(), CacheError> {
        if !request.is_get() {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }
        self.backend.put(name, request.key(), response).await
    }

    /// Fetch and store every request independently.
    ///
    /// One unreachable or non-cacheable URL never prevents the others from
    /// being stored; it is logged and listed in the report.
    pub async fn add_all(
        &self,
        name: &str,
        network: &dyn Network,
        requests: Vec<ProxyRequest>,
        policy: &CachePolicy,
    ) -> PopulationReport {
        let outcomes = join_all(requests.into_iter().map(|request| async move {
            let url = request.url.to_string();
            let result = self.add_one(name, network, &request, policy).await;
            (url, result)
        }))
        .await;

        let mut report = PopulationReport {
            store: name.to_string(),
            ..Default::default()
        };
        for (url, result) in outcomes {
            match result {
                Ok(()) => {
                    debug!(store = %name, url = %url, "Stored asset");
                    report.stored.push(url);
                }
                Err(reason) => {
                    warn!(store = %name, url = %url, reason = %reason, "Failed to store asset");
                    report.failed.push(PopulationFailure { url, reason });
                }
            }
        }
        info!(
            store = %name,
            stored = report.stored.len(),
            failed = report.failed.len(),
            "Population finished"
        );
        report
    }

    async fn add_one(
        &self,
        name: &str,
        network: &dyn Network,
        request: &ProxyRequest,
        policy: &CachePolicy,
    ) -> Result<(), String> {
        let response = network
            .fetch(request, FetchOptions::default())
            .await
            .map_err(|e| e.to_string())?;
        if !policy.is_cacheable(&response) {
            return Err(format!("response status {} is not cacheable", response.status));
        }
        self.put(name, request, response)
            .await
            .map_err(|e| e.to_string())
    }

    /// Store names in creation order.
    pub async fn names(&self) -> Result<Vec<String>, CacheError> {
        self.backend.names().await
    }

    pub async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.backend.has(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.backend.delete(name).await
    }

    /// Delete every store. Returns the names that were removed.
    pub async fn delete_all(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.backend.names().await? {
            if self.backend.delete(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    pub async fn usage(&self) -> Result<u64, CacheError> {
        self.backend.usage().await
    }

    pub async fn summary(&self) -> Result<Vec<StoreSummary>, CacheError> {
        let mut out = Vec::new();
        for name in self.backend.names().await? {
            let entries = self.backend.keys(&name).await?.len();
            out.push(StoreSummary { name, entries });
        }
        Ok(out)
    }
}
