//! Scripted network double shared by scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::error::NetworkError;
use crate::network::{FetchOptions, Network};
use crate::request::{Headers, ProxyRequest};
use crate::response::Response;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub url: String,
    pub options: FetchOptions,
    pub headers: Headers,
}

/// Network whose answers are set per URL and which can be switched offline.
///
/// Unknown URLs answer 404. A request whose `if-none-match` equals the
/// route's `etag` answers 304.
pub(crate) struct StubNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl StubNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn serve(&self, url: &str, response: Response) {
        let url = Url::parse(url).unwrap().to_string();
        self.routes.lock().unwrap().insert(url, response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls_to(&self, url: &str) -> usize {
        let url = Url::parse(url).unwrap().to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .count()
    }

    pub fn last_call_to(&self, url: &str) -> Option<RecordedCall> {
        let url = Url::parse(url).unwrap().to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.url == url)
            .cloned()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for StubNetwork {
    async fn fetch(
        &self,
        request: &ProxyRequest,
        options: FetchOptions,
    ) -> Result<Response, NetworkError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetworkError::Offline);
        }
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.clone(),
            options,
            headers: request.headers.clone(),
        });
        let route = self.routes.lock().unwrap().get(&url).cloned();
        match route {
            Some(resp) => {
                let not_modified = match (resp.etag(), request.headers.get("if-none-match")) {
                    (Some(etag), Some(wanted)) => etag == wanted,
                    _ => false,
                };
                if not_modified {
                    Ok(Response::new(304, "").with_url(url))
                } else {
                    Ok(resp.with_url(url))
                }
            }
            None => Ok(Response::new(404, "not found").with_url(url)),
        }
    }
}
