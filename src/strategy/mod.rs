//! Caching strategies and the per-class assignment table.

pub mod executor;

use serde::Serialize;

use crate::routing::RoutingClass;

pub use executor::StrategyExecutor;

/// Caching algorithm run for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Store first, network on miss.
    CacheFirst,
    /// Network first, store on failure.
    NetworkFirst,
    /// Serve stored value now, refresh it in the background.
    StaleWhileRevalidate,
    /// Network with caching disabled, synthetic response on failure.
    NetworkOnly,
    /// Forward untouched.
    Passthrough,
}

/// What to answer when both network and store come up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Stored shell document, else 503.
    ShellDocument,
    /// `{"offline": true}` with a 200.
    OfflineJson,
    /// 503.
    ServiceUnavailable,
    /// 502.
    BadGateway,
}

/// The strategy and fallback a routing class is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub strategy: Strategy,
    pub fallback: FallbackPolicy,
}

impl Assignment {
    pub fn for_class(class: RoutingClass) -> Self {
        use FallbackPolicy::*;
        use Strategy::*;
        let (strategy, fallback) = match class {
            RoutingClass::AuthoritativeApi => (NetworkOnly, OfflineJson),
            RoutingClass::FontAsset => (CacheFirst, ServiceUnavailable),
            RoutingClass::IconStyleAsset => (CacheFirst, ServiceUnavailable),
            RoutingClass::CdnLibrary => (StaleWhileRevalidate, ServiceUnavailable),
            RoutingClass::NavigationDocument => (NetworkFirst, ShellDocument),
            RoutingClass::CriticalShell => (CacheFirst, ServiceUnavailable),
            RoutingClass::GenericStatic => (CacheFirst, ServiceUnavailable),
            RoutingClass::Passthrough => (Passthrough, BadGateway),
        };
        Self { strategy, fallback }
    }
}
