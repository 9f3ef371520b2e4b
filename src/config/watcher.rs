//! File-mtime polling watcher for rolling config changes into the proxy.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Polling-based config watcher.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    last_mtime: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
            last_mtime: None,
        }
    }

    /// Emit a freshly loaded (env-overridden) config every time the file
    /// changes. Invalid files are rejected and the running config is kept.
    pub async fn watch(
        mut self,
        tx: mpsc::UnboundedSender<Config>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        self.last_mtime = read_mtime(&self.path);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Config watcher shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if *shutdown_rx.borrow() {
                return;
            }

            let current = read_mtime(&self.path);
            let changed = match (self.last_mtime, current) {
                (Some(prev), Some(next)) => next != prev,
                (None, Some(_)) => true,
                _ => false,
            };
            if !changed {
                continue;
            }

            self.last_mtime = current;
            let loaded = Config::load_from_path(&self.path).and_then(|mut config| {
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            });
            match loaded {
                Ok(config) => {
                    debug!(path = %self.path.display(), version = %config.cache.version, "Config file changed, reloading");
                    if tx.send(config).is_err() {
                        warn!("Config watcher receiver dropped, stopping watcher");
                        return;
                    }
                }
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "Config reload rejected; keeping running configuration"
                    );
                }
            }
        }
    }
}

fn read_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
