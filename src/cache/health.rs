//! Store health shared by serving and lifecycle code.
//!
//! Records store failures for status reporting. The store is never bypassed
//! up front: each failed lookup is treated as a miss and each failed write is
//! dropped where it happens, so requests fall through to the network and
//! class fallbacks instead of failing. The degraded flag stays set until the
//! stores are cleared.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::CacheError;

#[derive(Clone, Default)]
pub struct StoreHealth {
    degraded: Arc<AtomicBool>,
    failures: Arc<AtomicU64>,
}

impl StoreHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a store failure and switch to degraded mode.
    pub fn record_failure(&self, operation: &'static str, err: &CacheError) {
        let first = !self.degraded.swap(true, Ordering::SeqCst);
        self.failures.fetch_add(1, Ordering::Relaxed);
        if first {
            warn!(operation, error = %err, "Store failure, serving in degraded mode (network passthrough)");
        } else {
            warn!(operation, error = %err, "Store failure");
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Leave degraded mode (e.g. after stores were recreated).
    pub fn reset(&self) {
        self.degraded.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_sets_degraded_until_reset() {
        let health = StoreHealth::new();
        assert!(!health.is_degraded());
        let err = CacheError::Unavailable("disk gone".into());
        health.record_failure("put", &err);
        health.record_failure("get", &err);
        assert!(health.is_degraded());
        assert_eq!(health.failures(), 2);
        let shared = health.clone();
        shared.reset();
        assert!(!health.is_degraded());
    }
}
