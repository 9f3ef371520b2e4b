//! Strategy Executor.
//!
//! Every entry point resolves to a [`Response`]. Transport failures are
//! caught at the fetch and turned into store hits or class fallbacks; store
//! failures switch the proxy to degraded mode and are treated as misses.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CachePolicy, CacheStorage, MatchOptions, StoreHealth};
use crate::config::StoreNames;
use crate::lifecycle::{KeepAlive, LifecycleState};
use crate::network::{FetchOptions, Network};
use crate::request::ProxyRequest;
use crate::response::Response;
use crate::routing::RoutingClass;

use super::{Assignment, FallbackPolicy, Strategy};

struct Inner {
    storage: CacheStorage,
    network: Arc<dyn Network>,
    stores: StoreNames,
    policy: CachePolicy,
    shell_documents: Vec<Url>,
    keep_alive: KeepAlive,
    health: StoreHealth,
}

/// Runs the caching algorithm assigned to a routing class. Cheap to clone.
#[derive(Clone)]
pub struct StrategyExecutor {
    inner: Arc<Inner>,
    lifecycle: Option<watch::Receiver<LifecycleState>>,
}

impl StrategyExecutor {
    pub fn new(
        storage: CacheStorage,
        network: Arc<dyn Network>,
        stores: StoreNames,
        policy: CachePolicy,
        shell_documents: Vec<Url>,
        keep_alive: KeepAlive,
        health: StoreHealth,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                network,
                stores,
                policy,
                shell_documents,
                keep_alive,
                health,
            }),
            lifecycle: None,
        }
    }

    /// Follow the owning version's lifecycle. Once it is superseded, nothing
    /// more is written to its stores.
    pub fn with_lifecycle(mut self, state: watch::Receiver<LifecycleState>) -> Self {
        self.lifecycle = Some(state);
        self
    }

    fn superseded(&self) -> bool {
        self.lifecycle
            .as_ref()
            .is_some_and(|state| *state.borrow() == LifecycleState::Redundant)
    }

    pub fn stores(&self) -> &StoreNames {
        &self.inner.stores
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.inner.keep_alive
    }

    pub fn health(&self) -> &StoreHealth {
        &self.inner.health
    }

    /// Run the strategy assigned to `class`.
    pub async fn execute(&self, class: RoutingClass, request: &ProxyRequest) -> Response {
        let Assignment { strategy, fallback } = Assignment::for_class(class);
        debug!(url = %request.url, class = %class, strategy = ?strategy, "Executing strategy");
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, fallback).await,
            Strategy::NetworkFirst => self.network_first(request, fallback).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, fallback).await
            }
            Strategy::NetworkOnly => self.network_only(request, fallback).await,
            Strategy::Passthrough => self.passthrough(request).await,
        }
    }

    /// Stored response if present; otherwise fetch, store and return.
    pub async fn cache_first(&self, request: &ProxyRequest, fallback: FallbackPolicy) -> Response {
        if let Some((store, hit)) = self.lookup(request, MatchOptions::default()).await {
            debug!(url = %request.url, store = %store, "Cache hit");
            return hit;
        }
        debug!(url = %request.url, "Cache miss, fetching");
        match self.inner.network.fetch(request, FetchOptions::default()).await {
            Ok(response) => {
                self.store(&self.inner.stores.runtime_store, request, &response)
                    .await;
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Fetch failed after cache miss");
                self.fallback(fallback).await
            }
        }
    }

    /// Fresh network response if reachable; otherwise stored, otherwise fallback.
    pub async fn network_first(
        &self,
        request: &ProxyRequest,
        fallback: FallbackPolicy,
    ) -> Response {
        match self.inner.network.fetch(request, FetchOptions::default()).await {
            Ok(response) => {
                self.store(&self.inner.stores.runtime_store, request, &response)
                    .await;
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying store");
                let options = MatchOptions {
                    ignore_query: request.is_navigation(),
                };
                match self.lookup(request, options).await {
                    Some((_, hit)) => hit,
                    None => self.fallback(fallback).await,
                }
            }
        }
    }

    /// Stored response immediately, with a background refresh of the entry.
    /// A miss behaves like network-first for this request.
    pub async fn stale_while_revalidate(
        &self,
        request: &ProxyRequest,
        fallback: FallbackPolicy,
    ) -> Response {
        match self.lookup(request, MatchOptions::default()).await {
            Some((store, stored)) => {
                self.spawn_revalidation(store, request.clone(), stored.clone());
                stored
            }
            None => self.network_first(request, fallback).await,
        }
    }

    /// Network with caching disabled on the transport; never stored.
    pub async fn network_only(
        &self,
        request: &ProxyRequest,
        fallback: FallbackPolicy,
    ) -> Response {
        match self.inner.network.fetch(request, FetchOptions::no_store()).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Authoritative endpoint unreachable");
                self.fallback(fallback).await
            }
        }
    }

    /// Forward untouched; the store is never consulted.
    pub async fn passthrough(&self, request: &ProxyRequest) -> Response {
        match self.inner.network.fetch(request, FetchOptions::default()).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, method = %request.method, error = %e, "Passthrough failed");
                Response::bad_gateway()
            }
        }
    }

    async fn lookup(
        &self,
        request: &ProxyRequest,
        options: MatchOptions,
    ) -> Option<(String, Response)> {
        match self
            .inner
            .storage
            .match_in(&self.inner.stores.all(), &request.key(), options)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                self.inner.health.record_failure("match", &e);
                None
            }
        }
    }

    /// Store a copy of `response` if it is eligible. The caller keeps its own
    /// handle; both share the buffered body.
    async fn store(&self, store: &str, request: &ProxyRequest, response: &Response) {
        if !response.is_readable() || !self.inner.policy.is_cacheable(response) {
            debug!(url = %request.url, status = response.status, "Response not cacheable");
            return;
        }
        if self.superseded() {
            debug!(url = %request.url, store = %store, "Version superseded, not storing");
            return;
        }
        let snapshot = response.clone();
        if let Err(e) = self.inner.storage.put(store, request, snapshot).await {
            self.inner.health.record_failure("put", &e);
        }
    }

    fn spawn_revalidation(&self, store: String, request: ProxyRequest, stored: Response) {
        let this = self.clone();
        self.inner.keep_alive.spawn("revalidate", async move {
            this.revalidate(&store, &request, &stored).await;
        });
    }

    /// Refresh one stored entry. Failures are logged and dropped.
    ///
    /// Opaque entries are refetched unconditionally; others carrying an ETag
    /// are revalidated with `If-None-Match`.
    async fn revalidate(&self, store: &str, request: &ProxyRequest, stored: &Response) {
        let mut conditional = request.clone();
        if !stored.is_opaque() {
            if let Some(etag) = stored.etag() {
                conditional.headers.insert("if-none-match", etag);
            }
        }
        match self
            .inner
            .network
            .fetch(&conditional, FetchOptions::default())
            .await
        {
            Ok(fresh) if fresh.status == 304 => {
                debug!(url = %request.url, "Revalidation: not modified");
            }
            Ok(fresh) => {
                debug!(url = %request.url, status = fresh.status, store = %store, "Revalidation fetched");
                self.store(store, request, &fresh).await;
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Background revalidation failed");
            }
        }
    }

    async fn fallback(&self, policy: FallbackPolicy) -> Response {
        match policy {
            FallbackPolicy::ShellDocument => {
                for url in &self.inner.shell_documents {
                    let shell = ProxyRequest::get(url.clone());
                    if let Some((_, hit)) = self.lookup(&shell, MatchOptions::default()).await {
                        debug!(shell = %url, "Serving shell document");
                        return hit;
                    }
                }
                Response::service_unavailable()
            }
            FallbackPolicy::OfflineJson => Response::offline_json(),
            FallbackPolicy::ServiceUnavailable => Response::service_unavailable(),
            FallbackPolicy::BadGateway => Response::bad_gateway(),
        }
    }
}
