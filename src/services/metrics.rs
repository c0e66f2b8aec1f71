//! Metrics collector for observability

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared across the mesh and the approval coordinator.
pub struct Metrics {
    /// Health probes dispatched
    pub probes_dispatched: AtomicU64,
    /// Health probes that failed (timeout, connection failure, bad status)
    pub probe_failures: AtomicU64,
    /// Route attempts issued against agents (success or failure)
    pub route_attempts: AtomicU64,
    /// Route requests answered by an agent
    pub route_successes: AtomicU64,
    /// Route requests answered from the fallback cache
    pub fallback_cache_hits: AtomicU64,
    /// Route requests answered by a configured default
    pub fallback_defaults: AtomicU64,
    /// Route requests that exhausted every fallback tier
    pub route_unserved: AtomicU64,
    /// Approval records created
    pub approvals_created: AtomicU64,
    /// Actions auto-executed above the confidence threshold
    pub approvals_auto_executed: AtomicU64,
    /// Approvals resolved by an external decision
    pub approvals_resolved: AtomicU64,
    /// Approvals expired by TTL
    pub approvals_expired: AtomicU64,
    /// Duplicate resolutions ignored
    pub duplicate_resolutions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            probes_dispatched: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            route_attempts: AtomicU64::new(0),
            route_successes: AtomicU64::new(0),
            fallback_cache_hits: AtomicU64::new(0),
            fallback_defaults: AtomicU64::new(0),
            route_unserved: AtomicU64::new(0),
            approvals_created: AtomicU64::new(0),
            approvals_auto_executed: AtomicU64::new(0),
            approvals_resolved: AtomicU64::new(0),
            approvals_expired: AtomicU64::new(0),
            duplicate_resolutions: AtomicU64::new(0),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for the control API.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            probes_dispatched: self.probes_dispatched.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            route_attempts: self.route_attempts.load(Ordering::Relaxed),
            route_successes: self.route_successes.load(Ordering::Relaxed),
            fallback_cache_hits: self.fallback_cache_hits.load(Ordering::Relaxed),
            fallback_defaults: self.fallback_defaults.load(Ordering::Relaxed),
            route_unserved: self.route_unserved.load(Ordering::Relaxed),
            approvals_created: self.approvals_created.load(Ordering::Relaxed),
            approvals_auto_executed: self.approvals_auto_executed.load(Ordering::Relaxed),
            approvals_resolved: self.approvals_resolved.load(Ordering::Relaxed),
            approvals_expired: self.approvals_expired.load(Ordering::Relaxed),
            duplicate_resolutions: self.duplicate_resolutions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub probes_dispatched: u64,
    pub probe_failures: u64,
    pub route_attempts: u64,
    pub route_successes: u64,
    pub fallback_cache_hits: u64,
    pub fallback_defaults: u64,
    pub route_unserved: u64,
    pub approvals_created: u64,
    pub approvals_auto_executed: u64,
    pub approvals_resolved: u64,
    pub approvals_expired: u64,
    pub duplicate_resolutions: u64,
}
