//! Fetch, stores and classify command handlers.

use std::sync::Arc;

use anyhow::{Context, Result};

use offline_proxy::network::OfflineNetwork;
use offline_proxy::request::RequestMode;
use offline_proxy::routing::Classifier;
use offline_proxy::strategy::Assignment;
use offline_proxy::{Config, OfflineProxy, ProxyRequest};

/// Run one GET through the proxy.
pub(crate) async fn cmd_fetch(
    config: Config,
    url: &str,
    navigate: bool,
    offline: bool,
    include: bool,
) -> Result<()> {
    let target = config.resolve(url)?;
    let mut builder = OfflineProxy::builder(config);
    if offline {
        builder = builder.network(Arc::new(OfflineNetwork));
    }
    let proxy = builder.build().await.context("Failed to open stores")?;
    if !proxy.resume().await? {
        eprintln!(
            "Version {} is not installed; forwarding to the network (run `offline-proxy activate`)",
            proxy.version()
        );
    }

    let mut request = ProxyRequest::get(target);
    if navigate {
        request = request.with_mode(RequestMode::Navigate);
    }
    let class = proxy.classify(&request);
    let response = proxy.handle_fetch(request).await;
    // Let background revalidation finish writing before the process exits.
    proxy.shutdown().await;

    eprintln!("class: {}", class);
    println!("{}", response.status);
    if include {
        for (name, value) in response.headers.iter() {
            println!("{}: {}", name, value);
        }
        println!();
    }
    println!("{}", response.text());
    Ok(())
}

/// List stores, entry counts and total usage.
pub(crate) async fn cmd_stores(config: Config) -> Result<()> {
    let current = config.store_names();
    let proxy = OfflineProxy::from_config(config)
        .await
        .context("Failed to open stores")?;
    let summary = proxy.storage().summary().await?;
    if summary.is_empty() {
        println!("No stores");
        return Ok(());
    }
    for store in &summary {
        let marker = if current.contains(&store.name) { "*" } else { " " };
        println!("{} {:<40} {:>6} entries", marker, store.name, store.entries);
    }
    println!("Total: {} bytes", proxy.storage().usage().await?);
    Ok(())
}

/// Show which rule a request falls under and the strategy bound to it.
pub(crate) async fn cmd_classify(
    config: Config,
    url: &str,
    method: &str,
    navigate: bool,
) -> Result<()> {
    let target = config.resolve(url)?;
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid method '{}'", method))?;
    let classifier = Classifier::new(&config.routing, &config.shell_urls()?);

    let mut request = ProxyRequest::new(method, target);
    if navigate {
        request = request.with_mode(RequestMode::Navigate);
    }
    let class = classifier.classify(&request);
    let rule = classifier
        .explain(&request)
        .map(|r| r.name)
        .unwrap_or("none");
    let assignment = Assignment::for_class(class);

    println!("class:    {}", class);
    println!("rule:     {}", rule);
    println!("strategy: {:?}", assignment.strategy);
    println!("fallback: {:?}", assignment.fallback);
    Ok(())
}
