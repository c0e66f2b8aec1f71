//! Fallback policy — the ordered degradation path when routing cannot
//! reach a healthy target: fresh cached response, configured default,
//! then a typed unavailable result.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::debug;

/// Which tier served a degraded response
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackTier {
    Cache,
    Default,
    Error,
}

impl std::fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackTier::Cache => write!(f, "cache"),
            FallbackTier::Default => write!(f, "default"),
            FallbackTier::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a fallback resolution
#[derive(Debug, Clone)]
pub enum FallbackResult {
    /// A previously cached response for the same request key, still fresh
    Cached(Value),
    /// The configured static response for the capability
    Default(Value),
    /// No tier could serve; the router surfaces a routing error
    Unavailable,
}

struct CachedResponse {
    value: Value,
    stored_at: Instant,
}

pub struct FallbackPolicy {
    cache: DashMap<String, CachedResponse>,
    defaults: DashMap<String, Value>,
    cache_ttl: Duration,
}

impl FallbackPolicy {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            defaults: DashMap::new(),
            cache_ttl,
        }
    }

    /// Stable cache key for one capability + payload pair.
    pub fn request_key(capability: &str, payload: &Value) -> String {
        let mut hasher = DefaultHasher::new();
        capability.hash(&mut hasher);
        payload.to_string().hash(&mut hasher);
        format!("{capability}:{:016x}", hasher.finish())
    }

    /// Record a successful agent response for later cache fallback.
    pub fn record_success(&self, key: &str, value: &Value) {
        self.cache.insert(
            key.to_string(),
            CachedResponse {
                value: value.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Configure a static default response for a capability.
    pub fn set_default(&self, capability: &str, value: Value) {
        self.defaults.insert(capability.to_string(), value);
    }

    /// Resolve the fallback ladder in fixed order: cache, default, error.
    pub fn resolve(&self, capability: &str, key: &str) -> FallbackResult {
        if let Some(cached) = self.cache.get(key) {
            if cached.stored_at.elapsed() <= self.cache_ttl {
                debug!(capability, "fallback served from cache");
                return FallbackResult::Cached(cached.value.clone());
            }
            drop(cached);
            // Stale entry; evict so the map does not grow unbounded.
            self.cache.remove(key);
        }

        if let Some(default) = self.defaults.get(capability) {
            debug!(capability, "fallback served from configured default");
            return FallbackResult::Default(default.clone());
        }

        FallbackResult::Unavailable
    }
}
