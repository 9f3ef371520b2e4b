//! Response snapshots and the synthetic responses served when the network fails.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::Headers;

/// Header set on every locally constructed response.
pub const FALLBACK_HEADER: &str = "x-offline-fallback";

/// Where a response came from and how much of it is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin network response.
    Basic,
    /// Cross-origin response the client may inspect.
    Cors,
    /// Cross-origin `no-cors` response; status and body are not introspectable.
    Opaque,
    /// Network-level error response with no readable body.
    Error,
    /// Built locally by the proxy.
    Synthetic,
}

/// A fully buffered response.
///
/// Bodies are [`Bytes`], so `clone()` duplicates the snapshot without
/// copying the payload. A body read from the network is buffered once and the
/// caller and the store each get their own handle to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    #[serde(with = "body_base64")]
    pub body: Bytes,
    pub kind: ResponseKind,
    /// Final URL after redirects, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Set by the store on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<DateTime<Utc>>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
            url: None,
            stored_at: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// `{"offline": true}` with a 200 status, for authoritative endpoints.
    pub fn offline_json() -> Self {
        Self::synthetic(200, r#"{"offline":true}"#, "application/json", "offline")
    }

    /// Plain 503 used when neither network nor store can answer.
    pub fn service_unavailable() -> Self {
        Self::synthetic(503, "Service Unavailable", "text/plain; charset=utf-8", "unavailable")
    }

    /// Plain 502 used when a passthrough request cannot reach the network.
    pub fn bad_gateway() -> Self {
        Self::synthetic(502, "Bad Gateway", "text/plain; charset=utf-8", "unreachable")
    }

    fn synthetic(status: u16, body: &'static str, content_type: &str, reason: &str) -> Self {
        Self::new(status, Bytes::from_static(body.as_bytes()))
            .with_kind(ResponseKind::Synthetic)
            .with_header("content-type", content_type)
            .with_header(FALLBACK_HEADER, reason)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body can be read. Error responses carry none.
    pub fn is_readable(&self) -> bool {
        self.kind != ResponseKind::Error
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ResponseKind::Opaque
    }

    pub fn is_synthetic(&self) -> bool {
        self.kind == ResponseKind::Synthetic
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Bytes this entry accounts for in a store quota.
    pub fn size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.body.len() + headers) as u64
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
