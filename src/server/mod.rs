//! HTTP front-end: forward proxy plus the `/__offline` control surface.

pub mod routes;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{mpsc, watch, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::config::watcher::ConfigWatcher;
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::proxy::OfflineProxy;

/// Request bodies forwarded through the proxy are buffered up to this size.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared state for every handler. The proxy is swapped on version rollover.
#[derive(Clone)]
pub struct ServerState {
    proxy: Arc<RwLock<OfflineProxy>>,
    origin: Url,
}

impl ServerState {
    pub fn new(proxy: OfflineProxy, origin: Url) -> Self {
        Self {
            proxy: Arc::new(RwLock::new(proxy)),
            origin,
        }
    }

    /// The version currently answering requests.
    pub async fn current(&self) -> OfflineProxy {
        self.proxy.read().await.clone()
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    async fn replace(&self, next: OfflineProxy) -> OfflineProxy {
        std::mem::replace(&mut *self.proxy.write().await, next)
    }
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/__offline/command", post(routes::command))
        .route("/__offline/status", get(routes::status))
        .route("/__offline/clients", get(ws::clients))
        .fallback(routes::proxy_request)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install a new version next to the running one and swap it in once it is
/// active. The old version is retired and its stores are collected again
/// after it stops writing.
pub async fn roll_over(state: &ServerState, config: Config) -> Result<()> {
    let current = state.current().await;
    if config.cache.version == current.version() {
        info!(version = %current.version(), "Config changed without a version bump; restart to apply other settings");
        return Ok(());
    }
    info!(from = %current.version(), to = %config.cache.version, "Rolling over to new version");
    let next = OfflineProxy::builder(config)
        .storage(current.storage().clone())
        .clients(current.clients().clone())
        .build()
        .await?;
    next.start()
        .await
        .map_err(|e| ProxyError::Command(format!("lifecycle task failed: {}", e)))??;
    let previous = state.replace(next.clone()).await;
    next.supersede(&previous).await;
    Ok(())
}

/// Run the front-end until ctrl-c.
pub async fn serve(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let origin = config.origin()?;
    let bind = config.server.bind.clone();
    let poll = Duration::from_millis(config.server.poll_interval_ms);
    let watch_config = config.server.watch_config;

    let proxy = OfflineProxy::from_config(config).await?;
    let lifecycle = proxy.start();
    let state = ServerState::new(proxy, origin);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if watch_config {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let path = config_path.unwrap_or_else(Config::path);
        tokio::spawn(ConfigWatcher::new(path, poll).watch(tx, shutdown_rx));
        let rollover_state = state.clone();
        tokio::spawn(async move {
            while let Some(config) = rx.recv().await {
                if let Err(e) = roll_over(&rollover_state, config).await {
                    warn!(error = %e, "Version rollover failed; keeping current version");
                }
            }
        });
    }

    tokio::spawn(async move {
        match lifecycle.await {
            Ok(Ok((installed, activated))) => info!(
                version = %activated.version,
                shell_failed = installed.shell.failed.len(),
                libraries_failed = installed.libraries.failed.len(),
                deleted = activated.deleted.len(),
                "Proxy active"
            ),
            Ok(Err(e)) => warn!(error = %e, "Lifecycle failed"),
            Err(e) => warn!(error = %e, "Lifecycle task panicked"),
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Offline proxy listening on {bind}");
    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    state.current().await.shutdown().await;
    Ok(())
}
