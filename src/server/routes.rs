//! Route handlers.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::debug;
use url::Url;

use crate::error::ProxyError;
use crate::lifecycle::Command;
use crate::request::{Headers, ProxyRequest, RequestMode};
use crate::response::Response;

use super::{ServerState, MAX_BODY_BYTES};

/// Fallback handler: every request not aimed at `/__offline` is proxied.
pub async fn proxy_request(State(state): State<ServerState>, req: Request) -> axum::response::Response {
    let (parts, body) = req.into_parts();
    let url = match target_url(state.origin(), &parts.uri) {
        Some(url) => url,
        None => {
            return (StatusCode::BAD_REQUEST, format!("cannot proxy '{}'", parts.uri)).into_response()
        }
    };
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let headers: Headers = parts
        .headers
        .iter()
        .filter(|(name, _)| *name != header::HOST)
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
        .collect();
    let mode = infer_mode(&parts.method, &parts.headers);
    let request = ProxyRequest {
        method: parts.method,
        url,
        mode,
        headers,
        body,
    };
    debug!(method = %request.method, url = %request.url, mode = ?request.mode, "Intercepted");

    let proxy = state.current().await;
    into_http(proxy.handle_fetch(request).await)
}

/// `POST /__offline/command`
pub async fn command(
    State(state): State<ServerState>,
    Json(command): Json<Command>,
) -> axum::response::Response {
    let proxy = state.current().await;
    match proxy.handle_message(command).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            let status = match e {
                ProxyError::Lifecycle(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// `GET /__offline/status`
pub async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.current().await.status().await)
}

/// Absolute-form targets are taken as-is; origin-form paths resolve against
/// the configured origin.
fn target_url(origin: &Url, uri: &axum::http::Uri) -> Option<Url> {
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string()).ok();
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    origin.join(path).ok()
}

fn infer_mode(method: &axum::http::Method, headers: &HeaderMap) -> RequestMode {
    let fetch_mode = headers
        .get("sec-fetch-mode")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase());
    match fetch_mode.as_deref() {
        Some("navigate") => RequestMode::Navigate,
        Some("no-cors") => RequestMode::NoCors,
        Some("same-origin") => RequestMode::SameOrigin,
        Some(_) => RequestMode::Cors,
        None => {
            let wants_html = headers
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("text/html"));
            if *method == axum::http::Method::GET && wants_html {
                RequestMode::Navigate
            } else {
                RequestMode::Cors
            }
        }
    }
}

fn into_http(response: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let mut out = axum::response::Response::new(Body::from(response.body));
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in response.headers.iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    out
}
