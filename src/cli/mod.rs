//! CLI argument parsing and command dispatch.

mod inspect;
mod lifecycle;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_proxy::config::{LogFormat, LoggingConfig};
use offline_proxy::Config;

#[derive(Parser, Debug)]
#[command(name = "offline-proxy", version, about = "Request-interception proxy with versioned offline stores")]
pub(crate) struct Cli {
    /// Config file (default: ~/.offline-proxy/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store version tag
    #[arg(long, global = true)]
    version_tag: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Populate the current version's stores from the manifest
    Install,
    /// Install, then delete stale stores and take over clients
    Activate,
    /// Run one request through the proxy and print the response
    Fetch {
        /// Absolute URL, or a path resolved against the configured origin
        url: String,
        /// Treat as a top-level document load
        #[arg(long)]
        navigate: bool,
        /// Simulate a dead network
        #[arg(long)]
        offline: bool,
        /// Print the response headers
        #[arg(long, short = 'i')]
        include: bool,
    },
    /// Delete every store
    Clear,
    /// List stores with entry counts and total usage
    Stores,
    /// Show the routing class and rule a URL falls under
    Classify {
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        navigate: bool,
    },
    /// Run the HTTP front-end
    #[cfg(feature = "server")]
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
}

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => Config::load().context("Failed to load config")?,
    };
    if let Some(tag) = cli.version_tag {
        config.cache.version = tag;
    }
    config.validate().context("Invalid configuration")?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Install => lifecycle::cmd_install(config).await,
        Commands::Activate => lifecycle::cmd_activate(config).await,
        Commands::Clear => lifecycle::cmd_clear(config).await,
        Commands::Fetch {
            url,
            navigate,
            offline,
            include,
        } => inspect::cmd_fetch(config, &url, navigate, offline, include).await,
        Commands::Stores => inspect::cmd_stores(config).await,
        Commands::Classify {
            url,
            method,
            navigate,
        } => inspect::cmd_classify(config, &url, &method, navigate).await,
        #[cfg(feature = "server")]
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            offline_proxy::server::serve(config, cli.config)
                .await
                .context("Server failed")
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    let result = match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from(["offline-proxy", "fetch", "/index.html", "--offline"]).unwrap();
        match cli.command {
            Commands::Fetch { url, offline, navigate, .. } => {
                assert_eq!(url, "/index.html");
                assert!(offline);
                assert!(!navigate);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_version_tag() {
        let cli = Cli::try_parse_from(["offline-proxy", "stores", "--version-tag", "v9"]).unwrap();
        assert_eq!(cli.version_tag.as_deref(), Some("v9"));
    }

    #[test]
    fn test_classify_defaults_to_get() {
        let cli = Cli::try_parse_from(["offline-proxy", "classify", "https://unpkg.com/x.js"]).unwrap();
        match cli.command {
            Commands::Classify { method, .. } => assert_eq!(method, "GET"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
