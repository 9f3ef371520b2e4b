//! Proxy Front-End.
//!
//! Thin adapter between a host (HTTP server, CLI) and the classifier,
//! executor and lifecycle controller. Every intercepted request is awaited to
//! completion here before the host answers it.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheStorage, DiskBackend, MemoryBackend, StoreBackend, StoreHealth};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::lifecycle::{
    ActivationReport, ClientRegistry, Command, CommandOutcome, InstallReport, KeepAlive,
    LifecycleController, LifecycleState, Manifest,
};
use crate::network::{HttpNetwork, Network};
use crate::request::ProxyRequest;
use crate::response::Response;
use crate::routing::{Classifier, RoutingClass};
use crate::strategy::StrategyExecutor;

/// Snapshot reported by `GET /__offline/status` and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub version: String,
    pub state: LifecycleState,
    pub stores: Vec<String>,
    pub degraded: bool,
    pub store_failures: u64,
    pub clients: usize,
    pub pending_work: usize,
}

/// Assembles an [`OfflineProxy`] from config, with optional replacements for
/// the network, the store backend and the client registry.
pub struct ProxyBuilder {
    config: Config,
    network: Option<Arc<dyn Network>>,
    storage: Option<CacheStorage>,
    clients: Option<ClientRegistry>,
}

impl ProxyBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            network: None,
            storage: None,
            clients: None,
        }
    }

    pub fn network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn StoreBackend>) -> Self {
        self.storage = Some(CacheStorage::new(backend));
        self
    }

    /// Share an existing store façade, e.g. across a version rollover.
    pub fn storage(mut self, storage: CacheStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clients(mut self, clients: ClientRegistry) -> Self {
        self.clients = Some(clients);
        self
    }

    pub async fn build(self) -> Result<OfflineProxy> {
        let config = self.config;
        config.validate()?;
        let origin = config.origin()?;
        let stores = config.store_names();
        let shell = config.shell_urls()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => CacheStorage::new(open_backend(&config).await?),
        };
        let network: Arc<dyn Network> = match self.network {
            Some(network) => network,
            None => Arc::new(HttpNetwork::new(origin)),
        };
        let clients = self.clients.unwrap_or_default();
        let keep_alive = KeepAlive::new();
        let health = StoreHealth::new();
        let policy = config.cache.policy();

        let classifier = Classifier::new(&config.routing, &shell);
        let manifest = Manifest {
            shell,
            libraries: config.library_urls()?,
        };
        let lifecycle =
            LifecycleController::new(storage.clone(), network.clone(), stores.clone(), manifest)
                .with_policy(policy.clone())
                .with_skip_waiting(config.cache.skip_waiting)
                .with_clients(clients)
                .with_keep_alive(keep_alive.clone())
                .with_health(health.clone());
        let executor = StrategyExecutor::new(
            storage.clone(),
            network,
            stores,
            policy,
            config.shell_document_urls()?,
            keep_alive.clone(),
            health.clone(),
        )
        .with_lifecycle(lifecycle.subscribe());

        Ok(OfflineProxy {
            inner: Arc::new(Inner {
                classifier,
                executor,
                lifecycle,
                storage,
                keep_alive,
                health,
            }),
        })
    }
}

async fn open_backend(config: &Config) -> Result<Arc<dyn StoreBackend>> {
    let quota = config.cache.quota_bytes;
    let backend: Arc<dyn StoreBackend> = match config.cache.backend {
        BackendKind::Memory => Arc::new(match quota {
            Some(bytes) => MemoryBackend::with_quota(bytes),
            None => MemoryBackend::new(),
        }),
        BackendKind::Disk => {
            let dir = config.store_dir();
            debug!(dir = %dir.display(), "Opening disk store");
            Arc::new(DiskBackend::open(dir, quota).await?)
        }
    };
    Ok(backend)
}

struct Inner {
    classifier: Classifier,
    executor: StrategyExecutor,
    lifecycle: LifecycleController,
    storage: CacheStorage,
    keep_alive: KeepAlive,
    health: StoreHealth,
}

/// One version of the proxy. Cheap to clone.
#[derive(Clone)]
pub struct OfflineProxy {
    inner: Arc<Inner>,
}

impl OfflineProxy {
    pub async fn from_config(config: Config) -> Result<Self> {
        ProxyBuilder::new(config).build().await
    }

    pub fn builder(config: Config) -> ProxyBuilder {
        ProxyBuilder::new(config)
    }

    pub fn version(&self) -> &str {
        self.inner.lifecycle.version()
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.inner.lifecycle
    }

    pub fn clients(&self) -> &ClientRegistry {
        self.inner.lifecycle.clients()
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.inner.storage
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.inner.keep_alive
    }

    pub fn classify(&self, request: &ProxyRequest) -> RoutingClass {
        self.inner.classifier.classify(request)
    }

    pub fn classifier(&self) -> &Classifier {
        &self.inner.classifier
    }

    /// Answer an intercepted request.
    ///
    /// Until this version is active its clients are not controlled, so
    /// requests go straight to the network.
    pub async fn handle_fetch(&self, request: ProxyRequest) -> Response {
        if !self.inner.lifecycle.is_active() {
            debug!(url = %request.url, state = %self.inner.lifecycle.state(), "Not active, forwarding");
            return self.inner.executor.passthrough(&request).await;
        }
        let class = self.classify(&request);
        self.inner.executor.execute(class, &request).await
    }

    pub async fn handle_message(&self, command: Command) -> Result<CommandOutcome> {
        self.inner.lifecycle.handle(command).await
    }

    /// Run install then activation in the background, registered with the
    /// keep-alive registry.
    pub fn start(&self) -> JoinHandle<Result<(InstallReport, ActivationReport)>> {
        let lifecycle = self.inner.lifecycle.clone();
        self.inner
            .keep_alive
            .spawn("lifecycle", async move { lifecycle.run().await })
    }

    /// Go active on stores left by an earlier activation of this version.
    pub async fn resume(&self) -> Result<bool> {
        self.inner.lifecycle.resume().await
    }

    pub async fn status(&self) -> ProxyStatus {
        let stores = match self.inner.storage.names().await {
            Ok(names) => names,
            Err(e) => {
                self.inner.health.record_failure("names", &e);
                Vec::new()
            }
        };
        ProxyStatus {
            version: self.version().to_string(),
            state: self.inner.lifecycle.state(),
            stores,
            degraded: self.inner.health.is_degraded(),
            store_failures: self.inner.health.failures(),
            clients: self.clients().len(),
            pending_work: self.inner.keep_alive.pending(),
        }
    }

    /// Mark this version superseded and wait for its background work.
    pub async fn retire(&self) {
        self.inner.lifecycle.retire();
        self.inner.keep_alive.settle().await;
    }

    /// Take over from `previous` once this version is active: retire it,
    /// then collect whatever it wrote to its own stores after this version's
    /// activation removed them.
    pub async fn supersede(&self, previous: &OfflineProxy) -> Vec<String> {
        previous.retire().await;
        let deleted = self.inner.lifecycle.collect_stale().await;
        if !deleted.is_empty() {
            info!(from = %previous.version(), to = %self.version(), deleted = deleted.len(), "Collected stores written during rollover");
        }
        deleted
    }

    /// Wait for every registered unit of work, then stop.
    pub async fn shutdown(&self) {
        info!(version = %self.version(), pending = self.inner.keep_alive.pending(), "Shutting down");
        self.inner.keep_alive.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ClientMessage;
    use crate::testing::StubNetwork;
    use reqwest::Method;
    use tempfile::TempDir;
    use url::Url;

    fn config(version: &str) -> Config {
        let mut config = Config::default();
        config.app.origin = "https://app.test/".into();
        config.cache.version = version.into();
        config.cache.backend = BackendKind::Memory;
        config.manifest.libraries = vec!["https://unpkg.com/lib.js".into()];
        config
    }

    fn network() -> Arc<StubNetwork> {
        let network = StubNetwork::new();
        network.serve("https://app.test/", Response::new(200, "<shell>"));
        network.serve("https://app.test/index.html", Response::new(200, "<shell>"));
        network.serve("https://app.test/manifest.json", Response::new(200, "{}"));
        network.serve("https://unpkg.com/lib.js", Response::new(200, "lib"));
        network
    }

    async fn active_proxy(network: Arc<StubNetwork>) -> OfflineProxy {
        let proxy = OfflineProxy::builder(config("v1"))
            .network(network)
            .build()
            .await
            .unwrap();
        proxy.start().await.unwrap().unwrap();
        proxy
    }

    fn get(url: &str) -> ProxyRequest {
        ProxyRequest::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_forwards_before_activation() {
        let network = network();
        let proxy = OfflineProxy::builder(config("v1"))
            .network(network.clone())
            .build()
            .await
            .unwrap();
        let resp = proxy.handle_fetch(get("https://app.test/index.html")).await;
        assert_eq!(resp.text(), "<shell>");
        assert!(proxy.storage().names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_after_install_serves_shell() {
        let network = network();
        let proxy = active_proxy(network.clone()).await;
        network.set_online(false);

        let shell = proxy.handle_fetch(get("https://app.test/index.html")).await;
        assert_eq!(shell.text(), "<shell>");

        let nav = ProxyRequest::navigate(Url::parse("https://app.test/settings").unwrap());
        let resp = proxy.handle_fetch(nav).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text(), "<shell>");

        let lib = proxy.handle_fetch(get("https://unpkg.com/lib.js")).await;
        assert_eq!(lib.text(), "lib");
    }

    #[tokio::test]
    async fn test_api_precedence_over_font_extension() {
        let network = network();
        let proxy = active_proxy(network.clone()).await;
        network.set_online(false);
        let req = get("https://firestore.googleapis.com/fonts/brand.woff2");
        assert_eq!(proxy.classify(&req), RoutingClass::AuthoritativeApi);
        let resp = proxy.handle_fetch(req).await;
        assert_eq!(resp.content_type(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_post_is_forwarded_untouched() {
        let network = network();
        network.serve("https://app.test/api/save", Response::new(204, ""));
        let proxy = active_proxy(network.clone()).await;
        let post = ProxyRequest::new(Method::POST, Url::parse("https://app.test/api/save").unwrap());
        assert_eq!(proxy.handle_fetch(post).await.status, 204);
    }

    #[tokio::test]
    async fn test_clear_cache_command() {
        let proxy = active_proxy(network()).await;
        let mut client = proxy.clients().register();
        proxy.handle_message(Command::ClearCache).await.unwrap();
        assert_eq!(client.messages.recv().await.unwrap(), ClientMessage::CacheCleared);
        let status = proxy.status().await;
        assert!(status.stores.is_empty());
        assert_eq!(status.state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_status_reports_version_and_stores() {
        let proxy = active_proxy(network()).await;
        let status = proxy.status().await;
        assert_eq!(status.version, "v1");
        assert_eq!(
            status.stores,
            vec!["offline-app-static-v1", "offline-app-runtime-v1"]
        );
        assert!(!status.degraded);
    }

    #[tokio::test]
    async fn test_disk_backend_survives_restart() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("v1");
        cfg.cache.backend = BackendKind::Disk;
        cfg.cache.dir = Some(dir.path().to_path_buf());

        let first = OfflineProxy::builder(cfg.clone())
            .network(network())
            .build()
            .await
            .unwrap();
        first.start().await.unwrap().unwrap();
        first.shutdown().await;

        let offline = StubNetwork::new();
        offline.set_online(false);
        let second = OfflineProxy::builder(cfg)
            .network(offline)
            .build()
            .await
            .unwrap();
        assert!(second.resume().await.unwrap());
        let resp = second.handle_fetch(get("https://unpkg.com/lib.js")).await;
        assert_eq!(resp.text(), "lib");
    }

    #[tokio::test]
    async fn test_rollover_shares_storage_and_clients() {
        let network = network();
        let v1 = active_proxy(network.clone()).await;
        let v2 = OfflineProxy::builder(config("v2"))
            .network(network)
            .storage(v1.storage().clone())
            .clients(v1.clients().clone())
            .build()
            .await
            .unwrap();
        let mut client = v2.clients().register();
        v2.start().await.unwrap().unwrap();
        v1.retire().await;

        assert_eq!(
            client.messages.recv().await.unwrap(),
            ClientMessage::ControllerChanged {
                version: "v2".into()
            }
        );
        assert_eq!(
            v2.storage().names().await.unwrap(),
            vec!["offline-app-static-v2", "offline-app-runtime-v2"]
        );
    }

    #[tokio::test]
    async fn test_supersede_collects_stores_written_by_old_version() {
        let network = network();
        network.serve("https://app.test/late.js", Response::new(200, "late"));
        let v1 = active_proxy(network.clone()).await;
        let v2 = OfflineProxy::builder(config("v2"))
            .network(network)
            .storage(v1.storage().clone())
            .clients(v1.clients().clone())
            .build()
            .await
            .unwrap();
        v2.start().await.unwrap().unwrap();

        // v1 still serves until it is swapped out, and recreates its runtime store.
        let late = ProxyRequest::get(Url::parse("https://app.test/late.js").unwrap());
        assert_eq!(v1.handle_fetch(late.clone()).await.text(), "late");
        assert!(v1
            .storage()
            .names()
            .await
            .unwrap()
            .contains(&"offline-app-runtime-v1".to_string()));

        let deleted = v2.supersede(&v1).await;
        assert_eq!(deleted, vec!["offline-app-runtime-v1"]);
        assert_eq!(v1.lifecycle().state(), LifecycleState::Redundant);

        v1.handle_fetch(late).await;
        assert_eq!(
            v2.storage().names().await.unwrap(),
            vec!["offline-app-static-v2", "offline-app-runtime-v2"]
        );
    }
}
