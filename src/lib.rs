//! Offline Proxy - a client-resident request-interception proxy.
//!
//! Every outbound request from a controlled client is classified into a
//! routing class, answered by the caching strategy bound to that class, and
//! backed by versioned stores that are populated at install time and garbage
//! collected on activation.

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod proxy;
pub mod request;
pub mod response;
pub mod routing;
#[cfg(feature = "server")]
pub mod server;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use proxy::{OfflineProxy, ProxyBuilder, ProxyStatus};
pub use request::ProxyRequest;
pub use response::Response;
pub use routing::RoutingClass;
