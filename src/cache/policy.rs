//! Which network responses are eligible for storage.

use serde::{Deserialize, Serialize};

use crate::response::{Response, ResponseKind};

/// Storage eligibility rules shared by serving and population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Status codes that may be stored (default: only 200).
    pub cacheable_statuses: Vec<u16>,
    /// Whether cross-origin `no-cors` responses may be stored. Their status
    /// cannot be trusted, so when enabled they are stored regardless of it.
    pub cache_opaque: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            cacheable_statuses: vec![200],
            cache_opaque: false,
        }
    }
}

impl CachePolicy {
    pub fn is_cacheable(&self, response: &Response) -> bool {
        match response.kind {
            ResponseKind::Error | ResponseKind::Synthetic => false,
            ResponseKind::Opaque => self.cache_opaque,
            ResponseKind::Basic | ResponseKind::Cors => {
                self.cacheable_statuses.contains(&response.status)
            }
        }
    }
}
