//! Configuration for the offline proxy.
//!
//! Loaded from `~/.offline-proxy/config.json` (or an explicit path). Every
//! section is `#[serde(default)]`, so partial files are fine. Environment
//! overrides are applied on top:
//!
//! - `OFFLINE_PROXY_VERSION`: store version tag
//! - `OFFLINE_PROXY_STORE_DIR`: disk backend directory
//! - `OFFLINE_PROXY_BIND`: front-end listen address
//! - `OFFLINE_PROXY_ORIGIN`: application origin

pub mod watcher;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::cache::CachePolicy;
use crate::error::{ProxyError, Result};
use crate::routing::RoutingConfig;

/// Application identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin the application is served from; relative manifest entries
    /// resolve against it.
    pub origin: String,
    /// Prefix of every store name.
    pub store_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080/".to_string(),
            store_prefix: "offline-app".to_string(),
        }
    }
}

/// Which store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[default]
    Disk,
}

/// Store versioning and storage policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Version tag embedded in every store name. Changing it is what rolls
    /// clients onto new stores at the next activation.
    pub version: String,
    pub static_namespace: String,
    pub runtime_namespace: String,
    pub cacheable_statuses: Vec<u16>,
    /// Store cross-origin `no-cors` responses.
    pub cache_opaque: bool,
    pub backend: BackendKind,
    /// Disk backend directory (default: `~/.offline-proxy/stores`).
    pub dir: Option<PathBuf>,
    /// Upper bound on stored bytes; writes beyond it degrade to passthrough.
    pub quota_bytes: Option<u64>,
    /// Activate right after install instead of waiting for clients to leave.
    pub skip_waiting: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            static_namespace: "static".to_string(),
            runtime_namespace: "runtime".to_string(),
            cacheable_statuses: vec![200],
            cache_opaque: false,
            backend: BackendKind::Disk,
            dir: None,
            quota_bytes: None,
            skip_waiting: true,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            cacheable_statuses: self.cacheable_statuses.clone(),
            cache_opaque: self.cache_opaque,
        }
    }
}

/// Asset manifest: what to pre-populate at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Critical shell assets, usually same-origin.
    pub shell: Vec<String>,
    /// External libraries (CDN scripts and styles).
    pub libraries: Vec<String>,
    /// Documents tried in order when a navigation cannot be answered.
    pub shell_documents: Vec<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            shell: vec![
                "./".into(),
                "./index.html".into(),
                "./manifest.json".into(),
            ],
            libraries: vec![
                "https://cdn.tailwindcss.com".into(),
                "https://unpkg.com/react@18/umd/react.production.min.js".into(),
                "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js".into(),
                "https://unpkg.com/@babel/standalone/babel.min.js".into(),
                "https://cdn.jsdelivr.net/npm/chart.js".into(),
                "https://unpkg.com/@phosphor-icons/web".into(),
                "https://www.gstatic.com/firebasejs/12.7.0/firebase-app.js".into(),
                "https://www.gstatic.com/firebasejs/12.7.0/firebase-firestore.js".into(),
            ],
            shell_documents: vec!["./index.html".into(), "./".into()],
        }
    }
}

/// HTTP front-end settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Poll the config file and roll forward on version changes.
    pub watch_config: bool,
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            watch_config: true,
            poll_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub cache: CacheConfig,
    pub manifest: ManifestConfig,
    pub routing: RoutingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Names of the current-version stores, derived from config and handed to
/// the executor and lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    pub version: String,
    /// Populated at install time.
    pub static_store: String,
    /// Filled by cache misses during serving.
    pub runtime_store: String,
}

impl StoreNames {
    pub fn new(prefix: &str, version: &str, static_ns: &str, runtime_ns: &str) -> Self {
        Self {
            version: version.to_string(),
            static_store: format!("{}-{}-{}", prefix, static_ns, version),
            runtime_store: format!("{}-{}-{}", prefix, runtime_ns, version),
        }
    }

    /// Lookup order: static first, then runtime.
    pub fn all(&self) -> Vec<String> {
        vec![self.static_store.clone(), self.runtime_store.clone()]
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.static_store || name == self.runtime_store
    }
}

impl Config {
    /// `~/.offline-proxy`
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".offline-proxy")
    }

    /// `~/.offline-proxy/config.json`
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path with env overrides. A missing file yields
    /// the defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => {
                let config: Config = serde_json::from_str(&data).map_err(|e| {
                    ProxyError::Config(format!("{}: {}", path.display(), e))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ProxyError::Io(e)),
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup (env in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OFFLINE_PROXY_VERSION") {
            self.cache.version = v;
        }
        if let Some(v) = lookup("OFFLINE_PROXY_STORE_DIR") {
            self.cache.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("OFFLINE_PROXY_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("OFFLINE_PROXY_ORIGIN") {
            self.app.origin = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.origin()?;
        let version = self.cache.version.trim();
        if version.is_empty() || version.contains(char::is_whitespace) {
            return Err(ProxyError::Config(format!(
                "cache.version must be a non-empty tag without whitespace, got '{}'",
                self.cache.version
            )));
        }
        if self.cache.static_namespace == self.cache.runtime_namespace {
            return Err(ProxyError::Config(
                "cache.static_namespace and cache.runtime_namespace must differ".into(),
            ));
        }
        self.shell_urls()?;
        self.library_urls()?;
        self.shell_document_urls()?;
        Ok(())
    }

    pub fn origin(&self) -> Result<Url> {
        Url::parse(&self.app.origin)
            .map_err(|e| ProxyError::Config(format!("app.origin '{}': {}", self.app.origin, e)))
    }

    pub fn store_names(&self) -> StoreNames {
        StoreNames::new(
            &self.app.store_prefix,
            &self.cache.version,
            &self.cache.static_namespace,
            &self.cache.runtime_namespace,
        )
    }

    pub fn store_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| Self::dir().join("stores"))
    }

    pub fn shell_urls(&self) -> Result<Vec<Url>> {
        self.resolve_all(&self.manifest.shell)
    }

    pub fn library_urls(&self) -> Result<Vec<Url>> {
        self.resolve_all(&self.manifest.libraries)
    }

    pub fn shell_document_urls(&self) -> Result<Vec<Url>> {
        self.resolve_all(&self.manifest.shell_documents)
    }

    /// Resolve a manifest entry (absolute or relative to the origin).
    pub fn resolve(&self, entry: &str) -> Result<Url> {
        self.origin()?
            .join(entry)
            .map_err(|e| ProxyError::Config(format!("manifest entry '{}': {}", entry, e)))
    }

    fn resolve_all(&self, entries: &[String]) -> Result<Vec<Url>> {
        entries.iter().map(|e| self.resolve(e)).collect()
    }
}
