//! Install, activate and clear command handlers.

use anyhow::{Context, Result};

use offline_proxy::lifecycle::{Command, CommandOutcome};
use offline_proxy::{Config, OfflineProxy};

/// Populate the current version's stores.
pub(crate) async fn cmd_install(config: Config) -> Result<()> {
    let proxy = OfflineProxy::from_config(config)
        .await
        .context("Failed to open stores")?;
    let report = proxy.lifecycle().install().await?;

    println!("Installed version {}", report.version);
    for population in [&report.shell, &report.libraries] {
        println!(
            "  {}: {} stored, {} failed",
            population.store,
            population.stored.len(),
            population.failed.len()
        );
        for failure in &population.failed {
            println!("    ! {} ({})", failure.url, failure.reason);
        }
    }
    proxy.shutdown().await;
    Ok(())
}

/// Install (idempotent), then garbage-collect stale versions.
pub(crate) async fn cmd_activate(config: Config) -> Result<()> {
    let proxy = OfflineProxy::from_config(config)
        .await
        .context("Failed to open stores")?;
    let (installed, activated) = proxy
        .start()
        .await
        .context("Lifecycle task failed")??;

    let failed = installed.shell.failed.len() + installed.libraries.failed.len();
    println!("Version {} is active", activated.version);
    if failed > 0 {
        println!("  {} asset(s) could not be stored", failed);
    }
    if activated.deleted.is_empty() {
        println!("  No stale stores");
    } else {
        for name in &activated.deleted {
            println!("  Deleted {}", name);
        }
    }
    proxy.shutdown().await;
    Ok(())
}

/// Delete every store.
pub(crate) async fn cmd_clear(config: Config) -> Result<()> {
    let proxy = OfflineProxy::from_config(config)
        .await
        .context("Failed to open stores")?;
    let deleted = if proxy.resume().await? {
        match proxy.handle_message(Command::ClearCache).await? {
            CommandOutcome::CacheCleared(report) => report.deleted,
            CommandOutcome::SkipWaiting => Vec::new(),
        }
    } else {
        proxy.storage().delete_all().await?
    };

    if deleted.is_empty() {
        println!("No stores to delete");
    } else {
        println!("Deleted {} store(s):", deleted.len());
        for name in deleted {
            println!("  {}", name);
        }
    }
    proxy.shutdown().await;
    Ok(())
}
