//! Network side of every strategy.
//!
//! `Network` abstracts the transport for testability.
//! `HttpNetwork` performs real requests with reqwest.
//! `OfflineNetwork` fails every request, for exercising fallbacks.

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use url::Url;

use crate::error::NetworkError;
use crate::request::{Headers, ProxyRequest, RequestMode};
use crate::response::{Response, ResponseKind};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Per-fetch transport options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Ask every intermediate cache to stay out of the way.
    pub bypass_cache: bool,
}

impl FetchOptions {
    pub fn no_store() -> Self {
        Self { bypass_cache: true }
    }
}

/// Transport used by the strategy executor and store population.
///
/// A non-2xx status is a successful fetch; only transport failures are errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(
        &self,
        request: &ProxyRequest,
        options: FetchOptions,
    ) -> Result<Response, NetworkError>;
}

/// reqwest-backed network.
pub struct HttpNetwork {
    http: reqwest::Client,
    origin: Url,
}

impl HttpNetwork {
    /// Create a network client. `origin` decides which responses are
    /// same-origin (`basic`) and which are cross-origin.
    pub fn new(origin: Url) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("offline-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { http, origin }
    }

    fn response_kind(&self, request: &ProxyRequest) -> ResponseKind {
        if request.is_same_origin(&self.origin) {
            ResponseKind::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseKind::Opaque
        } else {
            ResponseKind::Cors
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(
        &self,
        request: &ProxyRequest,
        options: FetchOptions,
    ) -> Result<Response, NetworkError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            if !is_hop_by_hop(name) {
                builder = builder.header(name, value);
            }
        }
        if options.bypass_cache {
            builder = builder
                .header(CACHE_CONTROL, "no-store")
                .header(PRAGMA, "no-cache");
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(Response {
            status,
            headers,
            body,
            kind: self.response_kind(request),
            url: Some(final_url),
            stored_at: None,
        })
    }
}

/// Network that is always unreachable.
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
    async fn fetch(
        &self,
        _request: &ProxyRequest,
        _options: FetchOptions,
    ) -> Result<Response, NetworkError> {
        Err(NetworkError::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_filter() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("etag"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn test_response_kind_by_origin_and_mode() {
        let net = HttpNetwork::new(Url::parse("https://app.test/").unwrap());
        let same = ProxyRequest::get(Url::parse("https://app.test/a.js").unwrap());
        let cors = ProxyRequest::get(Url::parse("https://cdn.test/a.js").unwrap());
        let opaque = cors.clone().with_mode(RequestMode::NoCors);
        assert_eq!(net.response_kind(&same), ResponseKind::Basic);
        assert_eq!(net.response_kind(&cors), ResponseKind::Cors);
        assert_eq!(net.response_kind(&opaque), ResponseKind::Opaque);
    }

    #[tokio::test]
    async fn test_offline_network_always_fails() {
        let req = ProxyRequest::get(Url::parse("https://app.test/").unwrap());
        let err = OfflineNetwork
            .fetch(&req, FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Offline));
    }

    #[tokio::test]
    async fn test_http_network_unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let net = HttpNetwork::new(Url::parse("http://127.0.0.1:9/").unwrap());
        let req = ProxyRequest::get(Url::parse("http://127.0.0.1:9/index.html").unwrap());
        let err = net.fetch(&req, FetchOptions::no_store()).await.unwrap_err();
        assert!(matches!(err, NetworkError::Transport(_)));
    }
}
