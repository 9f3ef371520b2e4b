//! Error types for the offline proxy.
//!
//! Each component has its own error enum; [`ProxyError`] wraps them so the
//! lifecycle and front-end layers can use a single [`Result`] alias.

use thiserror::Error;

/// Failures raised by the store layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend cannot be used at all (poisoned lock, missing directory).
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    /// A write would push the backend past its byte quota.
    #[error("store quota exceeded: need {needed} bytes, limit is {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    /// Only GET requests can be used as store keys.
    #[error("cannot store a response for a {0} request")]
    UnsupportedMethod(String),

    /// Filesystem error from the disk backend.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted store file could not be decoded.
    #[error("store file is corrupt: {0}")]
    Corrupt(String),
}

/// Transport-level failures. A non-2xx status is never a `NetworkError`.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// No route to the network at all.
    #[error("network is offline")]
    Offline,
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            NetworkError::InvalidUrl(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Invalid use of the lifecycle state machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("controller is not active")]
    NotActive,
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid command: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
