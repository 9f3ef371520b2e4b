//! Intercepted requests and the keys stores index them by.

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the client issued the request, mirroring the fetch `mode` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    /// Cross-origin request whose response the client cannot inspect.
    NoCors,
}

/// Ordered, case-insensitive header list. Names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.0.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Append a value, keeping existing ones (e.g. repeated `set-cookie`).
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}

/// An outbound request intercepted from a controlled client.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Headers,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::default(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A top-level document load.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_mode(RequestMode::Navigate)
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Lowercased host of the request URL, if any.
    pub fn host(&self) -> Option<String> {
        self.url.host_str().map(|h| h.to_ascii_lowercase())
    }

    /// Lowercased file extension of the last path segment (`woff2`, `css`).
    pub fn extension(&self) -> Option<String> {
        let segment = self.url.path_segments()?.next_back()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Whether the URL shares scheme, host and port with `origin`.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Store key: method plus normalized URL (fragment removed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        Self(format!("{} {}", method.as_str(), normalized))
    }

    /// The same key with its query string dropped.
    pub fn without_query(&self) -> RequestKey {
        match self.0.split_once('?') {
            Some((head, _)) => RequestKey(head.to_string()),
            None => self.clone(),
        }
    }

    pub fn method(&self) -> &str {
        self.0.split_once(' ').map(|(m, _)| m).unwrap_or_default()
    }

    pub fn url(&self) -> &str {
        self.0.split_once(' ').map(|(_, u)| u).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_key_strips_fragment() {
        let a = ProxyRequest::get(url("https://app.test/index.html#top")).key();
        let b = ProxyRequest::get(url("https://app.test/index.html")).key();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET https://app.test/index.html");
    }

    #[test]
    fn test_key_is_method_aware() {
        let get = ProxyRequest::get(url("https://app.test/api")).key();
        let post = ProxyRequest::new(Method::POST, url("https://app.test/api")).key();
        assert_ne!(get, post);
        assert_eq!(post.method(), "POST");
    }

    #[test]
    fn test_key_without_query() {
        let key = ProxyRequest::get(url("https://app.test/app.js?v=3")).key();
        assert_eq!(key.without_query().url(), "https://app.test/app.js");
        let plain = ProxyRequest::get(url("https://app.test/app.js")).key();
        assert_eq!(plain.without_query(), plain);
    }

    #[test]
    fn test_extension() {
        let req = ProxyRequest::get(url("https://fonts.test/a/Inter.WOFF2?x=1"));
        assert_eq!(req.extension().as_deref(), Some("woff2"));
        assert!(ProxyRequest::get(url("https://app.test/")).extension().is_none());
        assert!(ProxyRequest::get(url("https://app.test/.hidden"))
            .extension()
            .is_none());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let req = ProxyRequest::get(url("https://app.test/")).with_header("Accept", "text/html");
        assert_eq!(req.headers.get("accept"), Some("text/html"));
        assert_eq!(req.headers.get("ACCEPT"), Some("text/html"));
    }

    #[test]
    fn test_headers_insert_replaces() {
        let mut headers = Headers::new();
        headers.append("set-cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert_eq!(headers.len(), 2);
        headers.insert("Set-Cookie", "c=3");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("set-cookie"), Some("c=3"));
    }

    #[test]
    fn test_same_origin() {
        let origin = url("https://app.test/");
        assert!(ProxyRequest::get(url("https://app.test/x.js")).is_same_origin(&origin));
        assert!(!ProxyRequest::get(url("https://cdn.test/x.js")).is_same_origin(&origin));
    }
}
