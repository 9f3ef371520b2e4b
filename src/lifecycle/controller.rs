//! Lifecycle Controller: install, activate, invalidate.
//!
//! One controller drives one version. Store names come from the injected
//! [`StoreNames`], so two controllers for different versions can share a
//! backend side by side.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CachePolicy, CacheStorage, PopulationReport, StoreHealth};
use crate::config::StoreNames;
use crate::error::{LifecycleError, Result};
use crate::network::Network;
use crate::request::ProxyRequest;

use super::clients::{ClientMessage, ClientRegistry};
use super::keepalive::KeepAlive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Installing,
    /// Installed and waiting for the activation permit.
    Installed,
    Activating,
    Active,
    /// Superseded by a newer version.
    Redundant,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands accepted from application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Activate without waiting for clients to go away.
    SkipWaiting,
    /// Delete every store, then broadcast `CACHE_CLEARED`.
    ClearCache,
}

/// Assets to pre-populate at install time.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub shell: Vec<Url>,
    pub libraries: Vec<Url>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub version: String,
    pub shell: PopulationReport,
    pub libraries: PopulationReport,
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub version: String,
    pub deleted: Vec<String>,
    pub claimed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    pub deleted: Vec<String>,
    pub notified: usize,
}

/// Result of [`LifecycleController::handle`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandOutcome {
    SkipWaiting,
    CacheCleared(InvalidationReport),
}

#[derive(Default)]
struct SkipSignal {
    set: AtomicBool,
    notify: Notify,
}

#[derive(Clone)]
pub struct LifecycleController {
    storage: CacheStorage,
    network: Arc<dyn Network>,
    stores: StoreNames,
    manifest: Manifest,
    policy: CachePolicy,
    skip_on_install: bool,
    clients: ClientRegistry,
    keep_alive: KeepAlive,
    health: StoreHealth,
    state: Arc<watch::Sender<LifecycleState>>,
    skip: Arc<SkipSignal>,
}

impl LifecycleController {
    pub fn new(
        storage: CacheStorage,
        network: Arc<dyn Network>,
        stores: StoreNames,
        manifest: Manifest,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            storage,
            network,
            stores,
            manifest,
            policy: CachePolicy::default(),
            skip_on_install: true,
            clients: ClientRegistry::default(),
            keep_alive: KeepAlive::new(),
            health: StoreHealth::new(),
            state: Arc::new(state),
            skip: Arc::new(SkipSignal::default()),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether install signals skip-waiting on completion.
    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_on_install = skip;
        self
    }

    pub fn with_clients(mut self, clients: ClientRegistry) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_health(mut self, health: StoreHealth) -> Self {
        self.health = health;
        self
    }

    pub fn version(&self) -> &str {
        &self.stores.version
    }

    pub fn stores(&self) -> &StoreNames {
        &self.stores
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    fn transition(
        &self,
        allowed: &[LifecycleState],
        to: LifecycleState,
        action: &'static str,
    ) -> std::result::Result<(), LifecycleError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if allowed.contains(current) {
                debug!(from = %current, to = %to, version = %self.stores.version, "Lifecycle transition");
                let changed = *current != to;
                *current = to;
                changed
            } else {
                outcome = Err(LifecycleError::InvalidTransition {
                    from: current.to_string(),
                    action,
                });
                false
            }
        });
        outcome
    }

    fn set_state(&self, to: LifecycleState) {
        self.state.send_replace(to);
    }

    /// Open the current stores and populate the static store with the shell
    /// and library sets. Individual asset failures are reported, never fatal.
    ///
    /// Repeating an install of the same version replaces entries in place.
    pub async fn install(&self) -> Result<InstallReport> {
        use LifecycleState::*;
        self.transition(&[Idle, Installing, Installed], Installing, "install")?;
        info!(version = %self.stores.version, "Installing");

        for name in self.stores.all() {
            if let Err(e) = self.storage.open(&name).await {
                self.health.record_failure("open", &e);
            }
        }

        let static_store = &self.stores.static_store;
        let shell = to_requests(&self.manifest.shell);
        let libraries = to_requests(&self.manifest.libraries);
        let (shell, libraries) = tokio::join!(
            self.storage
                .add_all(static_store, self.network.as_ref(), shell, &self.policy),
            self.storage
                .add_all(static_store, self.network.as_ref(), libraries, &self.policy),
        );

        self.set_state(Installed);
        if self.skip_on_install {
            self.skip_waiting();
        }
        info!(
            version = %self.stores.version,
            shell_failed = shell.failed.len(),
            libraries_failed = libraries.failed.len(),
            "Installed"
        );
        Ok(InstallReport {
            version: self.stores.version.clone(),
            shell,
            libraries,
            skip_waiting: self.skip_on_install,
        })
    }

    /// Grant the activation permit without waiting for clients to close.
    pub fn skip_waiting(&self) {
        self.skip.set.store(true, Ordering::SeqCst);
        self.skip.notify.notify_waiters();
    }

    /// Resolve once activation may proceed: skip-waiting was signalled, or
    /// no clients remain registered.
    pub async fn wait_for_activation(&self) {
        loop {
            let notified = self.skip.notify.notified();
            if self.skip.set.load(Ordering::SeqCst) {
                return;
            }
            debug!(clients = self.clients.len(), "Waiting for clients before activating");
            tokio::select! {
                _ = notified => {}
                _ = self.clients.wait_until_empty() => return,
            }
        }
    }

    /// Delete every store not named for the current version, then claim all
    /// registered clients.
    pub async fn activate(&self) -> Result<ActivationReport> {
        use LifecycleState::*;
        self.transition(&[Installed], Activating, "activate")?;
        info!(version = %self.stores.version, "Activating");

        let deleted = self.collect_stale().await;
        let claimed = self.clients.claim(&self.stores.version);
        self.set_state(Active);
        info!(version = %self.stores.version, deleted = deleted.len(), claimed, "Active");
        Ok(ActivationReport {
            version: self.stores.version.clone(),
            deleted,
            claimed,
        })
    }

    /// Delete every store not named for this version. Failures are recorded
    /// and skipped.
    pub async fn collect_stale(&self) -> Vec<String> {
        let mut deleted = Vec::new();
        let names = match self.storage.names().await {
            Ok(names) => names,
            Err(e) => {
                self.health.record_failure("names", &e);
                return deleted;
            }
        };
        for name in names.into_iter().filter(|n| !self.stores.contains(n)) {
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!(store = %name, "Deleted stale store");
                    deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => self.health.record_failure("delete", &e),
            }
        }
        deleted
    }

    /// Install, wait for the permit, activate.
    pub async fn run(&self) -> Result<(InstallReport, ActivationReport)> {
        let installed = self.install().await?;
        self.wait_for_activation().await;
        let activated = self.activate().await?;
        Ok((installed, activated))
    }

    /// Pick up a version an earlier process installed: if its static store
    /// exists, collect every other version's stores and go straight to
    /// active without repopulating.
    ///
    /// A fresh process has no clients left to wait for, so an installed but
    /// never activated version is activated here.
    pub async fn resume(&self) -> Result<bool> {
        if self.state() != LifecycleState::Idle {
            return Ok(self.is_active());
        }
        if !self.storage.has(&self.stores.static_store).await? {
            return Ok(false);
        }
        let deleted = self.collect_stale().await;
        self.clients.claim(&self.stores.version);
        self.set_state(LifecycleState::Active);
        info!(version = %self.stores.version, deleted = deleted.len(), "Resumed active version");
        Ok(true)
    }

    /// Delete every store unconditionally and tell every client.
    pub async fn invalidate(&self) -> Result<InvalidationReport> {
        if !self.is_active() {
            return Err(LifecycleError::NotActive.into());
        }
        let deleted = self.storage.delete_all().await?;
        self.health.reset();
        let notified = self.clients.len();
        self.clients.broadcast(ClientMessage::CacheCleared);
        info!(deleted = deleted.len(), notified, "Stores cleared");
        Ok(InvalidationReport { deleted, notified })
    }

    /// Mark this version as superseded.
    pub fn retire(&self) {
        if self.state() != LifecycleState::Redundant {
            warn!(version = %self.stores.version, "Version retired");
            self.set_state(LifecycleState::Redundant);
        }
    }

    pub async fn handle(&self, command: Command) -> Result<CommandOutcome> {
        debug!(command = ?command, "Received command");
        match command {
            Command::SkipWaiting => {
                self.skip_waiting();
                Ok(CommandOutcome::SkipWaiting)
            }
            Command::ClearCache => {
                let this = self.clone();
                let report = self
                    .keep_alive
                    .spawn("invalidate", async move { this.invalidate().await })
                    .await
                    .map_err(|e| crate::error::ProxyError::Command(e.to_string()))??;
                Ok(CommandOutcome::CacheCleared(report))
            }
        }
    }
}

fn to_requests(urls: &[Url]) -> Vec<ProxyRequest> {
    urls.iter().cloned().map(ProxyRequest::get).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::response::Response;
    use crate::testing::StubNetwork;
    use std::time::Duration;

    fn names(version: &str) -> StoreNames {
        StoreNames::new("app", version, "static", "runtime")
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn shell_network() -> Arc<StubNetwork> {
        let network = StubNetwork::new();
        network.serve("https://app.test/", Response::new(200, "<shell>"));
        network.serve("https://app.test/index.html", Response::new(200, "<shell>"));
        network.serve("https://unpkg.com/lib.js", Response::new(200, "lib"));
        network
    }

    fn controller(storage: CacheStorage, version: &str) -> LifecycleController {
        let manifest = Manifest {
            shell: vec![url("https://app.test/"), url("https://app.test/index.html")],
            libraries: vec![url("https://unpkg.com/lib.js")],
        };
        LifecycleController::new(storage, shell_network(), names(version), manifest)
    }

    #[tokio::test]
    async fn test_activation_deletes_old_versions() {
        let storage = CacheStorage::in_memory();
        for name in names("v1").all() {
            storage.open(&name).await.unwrap();
        }
        let ctl = controller(storage.clone(), "v2");
        let (_, activated) = ctl.run().await.unwrap();

        assert_eq!(activated.deleted, names("v1").all());
        assert_eq!(storage.names().await.unwrap(), names("v2").all());
        assert_eq!(ctl.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_population_isolates_failures() {
        let storage = CacheStorage::in_memory();
        let network = shell_network();
        let manifest = Manifest {
            shell: vec![
                url("https://app.test/"),
                url("https://app.test/index.html"),
                url("https://app.test/gone.json"),
            ],
            libraries: vec![],
        };
        let ctl = LifecycleController::new(storage.clone(), network, names("v1"), manifest);
        let report = ctl.install().await.unwrap();

        assert_eq!(report.shell.stored.len(), 2);
        assert_eq!(report.shell.failed.len(), 1);
        assert_eq!(report.shell.failed[0].url, "https://app.test/gone.json");
        let store = storage.open(&names("v1").static_store).await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 2);
        assert_eq!(ctl.state(), LifecycleState::Installed);
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let storage = CacheStorage::in_memory();
        let ctl = controller(storage.clone(), "v1");
        ctl.install().await.unwrap();
        ctl.install().await.unwrap();
        let store = storage.open(&names("v1").static_store).await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let ctl = controller(CacheStorage::in_memory(), "v1");
        let err = ctl.activate().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot activate while idle");
    }

    #[tokio::test]
    async fn test_invalidate_requires_active() {
        let ctl = controller(CacheStorage::in_memory(), "v1");
        let err = ctl.invalidate().await.unwrap_err();
        assert!(matches!(err, ProxyError::Lifecycle(LifecycleError::NotActive)));
    }

    #[tokio::test]
    async fn test_clear_cache_broadcasts_to_clients() {
        let storage = CacheStorage::in_memory();
        let ctl = controller(storage.clone(), "v1");
        let mut client = ctl.clients().register();
        ctl.run().await.unwrap();
        assert_eq!(
            client.messages.recv().await.unwrap(),
            ClientMessage::ControllerChanged {
                version: "v1".into()
            }
        );

        let outcome = ctl.handle(Command::ClearCache).await.unwrap();
        match outcome {
            CommandOutcome::CacheCleared(report) => {
                assert_eq!(report.deleted, names("v1").all());
                assert_eq!(report.notified, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(client.messages.recv().await.unwrap(), ClientMessage::CacheCleared);
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_skip_waiting_activation_waits_for_clients() {
        let ctl = controller(CacheStorage::in_memory(), "v1").with_skip_waiting(false);
        let client = ctl.clients().register();
        let run = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.run().await })
        };
        let mut state = ctl.subscribe();
        state
            .wait_for(|s| *s == LifecycleState::Installed)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctl.state(), LifecycleState::Installed);

        ctl.clients().unregister(client.id);
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(ctl.is_active());
    }

    #[tokio::test]
    async fn test_skip_waiting_command_releases_activation() {
        let ctl = controller(CacheStorage::in_memory(), "v1").with_skip_waiting(false);
        let _client = ctl.clients().register();
        let run = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.run().await })
        };
        let mut state = ctl.subscribe();
        state
            .wait_for(|s| *s == LifecycleState::Installed)
            .await
            .unwrap();
        ctl.handle(Command::SkipWaiting).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(ctl.is_active());
    }

    #[tokio::test]
    async fn test_versions_side_by_side() {
        let storage = CacheStorage::in_memory();
        let v1 = controller(storage.clone(), "v1");
        let v2 = controller(storage.clone(), "v2");
        v1.run().await.unwrap();
        v2.install().await.unwrap();
        assert_eq!(storage.names().await.unwrap().len(), 4);
        v2.activate().await.unwrap();
        v1.retire();
        assert_eq!(v1.state(), LifecycleState::Redundant);
        assert_eq!(storage.names().await.unwrap(), names("v2").all());
    }

    #[tokio::test]
    async fn test_resume_requires_existing_static_store() {
        let storage = CacheStorage::in_memory();
        let fresh = controller(storage.clone(), "v1");
        assert!(!fresh.resume().await.unwrap());
        assert_eq!(fresh.state(), LifecycleState::Idle);

        controller(storage.clone(), "v1").run().await.unwrap();
        let restarted = controller(storage, "v1");
        assert!(restarted.resume().await.unwrap());
        assert!(restarted.is_active());
    }

    #[tokio::test]
    async fn test_resume_of_installed_version_collects_older_stores() {
        let storage = CacheStorage::in_memory();
        controller(storage.clone(), "v1").run().await.unwrap();
        controller(storage.clone(), "v2").install().await.unwrap();
        assert_eq!(storage.names().await.unwrap().len(), 4);

        let restarted = controller(storage.clone(), "v2");
        assert!(restarted.resume().await.unwrap());
        assert!(restarted.is_active());
        assert_eq!(storage.names().await.unwrap(), names("v2").all());
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(cmd, Command::SkipWaiting);
        let cmd: Command = serde_json::from_str(r#"{"type":"CLEAR_CACHE"}"#).unwrap();
        assert_eq!(cmd, Command::ClearCache);
        assert!(serde_json::from_str::<Command>(r#"{"type":"NOPE"}"#).is_err());
    }
}
