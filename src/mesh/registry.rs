//! Agent registry — authoritative map of agent name to descriptor and
//! health telemetry.
//!
//! Storage and atomic per-entry updates only; admission policy lives in
//! the discovery service and probing in the health monitor.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::types::{
    AgentDescriptor, EntrySnapshot, HealthState, HealthTelemetry, ProbeConfig, ProbeOutcome,
};

/// Consecutive failures at which an Unhealthy agent is declared Dead.
pub const DEAD_FAILURE_THRESHOLD: u32 = 10;

/// Apply one probe outcome to an entry's telemetry.
///
/// Implements the transition table: a success zeroes the failure counter
/// and vice versa; no transition happens until a threshold is met. Dead
/// recovers only when a restart was requested and a probe succeeds.
pub(crate) fn apply_probe(
    telemetry: &mut HealthTelemetry,
    outcome: ProbeOutcome,
    config: &ProbeConfig,
) {
    match outcome {
        ProbeOutcome::Success => {
            telemetry.consecutive_failures = 0;
            telemetry.consecutive_successes =
                telemetry.consecutive_successes.saturating_add(1);

            match telemetry.state {
                HealthState::Unknown => {
                    telemetry.state = HealthState::Healthy;
                }
                HealthState::Unhealthy
                    if telemetry.consecutive_successes >= config.healthy_threshold =>
                {
                    telemetry.state = HealthState::Healthy;
                }
                HealthState::Dead if telemetry.restart_requested => {
                    telemetry.state = HealthState::Healthy;
                }
                _ => {}
            }

            if telemetry.state == HealthState::Healthy {
                telemetry.restart_requested = false;
            }
        }
        ProbeOutcome::Failure => {
            telemetry.consecutive_successes = 0;
            telemetry.consecutive_failures =
                telemetry.consecutive_failures.saturating_add(1);

            match telemetry.state {
                HealthState::Healthy
                    if telemetry.consecutive_failures >= config.unhealthy_threshold =>
                {
                    telemetry.state = HealthState::Unhealthy;
                }
                HealthState::Unhealthy
                    if telemetry.consecutive_failures >= DEAD_FAILURE_THRESHOLD =>
                {
                    telemetry.state = HealthState::Dead;
                }
                _ => {}
            }
        }
    }
}

struct RegistryEntry {
    descriptor: AgentDescriptor,
    health: HealthTelemetry,
    registered_at: chrono::DateTime<Utc>,
    seq: u64,
}

impl RegistryEntry {
    fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            descriptor: self.descriptor.clone(),
            health: self.health.clone(),
            registered_at: self.registered_at,
            seq: self.seq,
        }
    }
}

/// In-memory agent registry.
///
/// Entry updates go through the map's per-entry exclusive guard, so a
/// probe result is always a read-modify-write — concurrent probe
/// completions cannot lose counter updates.
pub struct Registry {
    entries: DashMap<String, RegistryEntry>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert or replace a descriptor.
    ///
    /// A replacement keeps the original registration position (stable
    /// round-robin order) but resets health to Unknown.
    pub fn insert(&self, descriptor: AgentDescriptor) -> EntrySnapshot {
        let name = descriptor.name.clone();
        let mut entry = self.entries.entry(name.clone()).or_insert_with(|| {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            RegistryEntry {
                descriptor: descriptor.clone(),
                health: HealthTelemetry::default(),
                registered_at: Utc::now(),
                seq,
            }
        });

        // Re-registration: replace the descriptor, reset health.
        if entry.descriptor.endpoints != descriptor.endpoints {
            debug!(agent = %name, "re-registration replaces endpoint set, health reset");
        }
        entry.descriptor = descriptor;
        entry.health = HealthTelemetry::default();
        entry.registered_at = Utc::now();

        entry.snapshot()
    }

    /// Remove an entry. In-flight calls to the agent complete or fail
    /// naturally.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            info!(agent = name, "deregistered agent");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<EntrySnapshot> {
        self.entries.get(name).map(|e| e.snapshot())
    }

    /// All entries in registration order.
    pub fn all(&self) -> Vec<EntrySnapshot> {
        let mut out: Vec<EntrySnapshot> =
            self.entries.iter().map(|e| e.snapshot()).collect();
        out.sort_by_key(|s| s.seq);
        out
    }

    /// Entries advertising the capability, in registration order.
    pub fn for_capability(&self, capability: &str) -> Vec<EntrySnapshot> {
        let mut out: Vec<EntrySnapshot> = self
            .entries
            .iter()
            .filter(|e| e.descriptor.has_capability(capability))
            .map(|e| e.snapshot())
            .collect();
        out.sort_by_key(|s| s.seq);
        out
    }

    /// Record one probe result under the entry's exclusive guard.
    ///
    /// Returns the (previous, current) state pair, or None when the agent
    /// was deregistered while the probe was in flight.
    pub fn record_probe(
        &self,
        name: &str,
        outcome: ProbeOutcome,
        latency_ms: Option<u64>,
    ) -> Option<(HealthState, HealthState)> {
        let mut entry = self.entries.get_mut(name)?;
        let before = entry.health.state;
        let config = entry.descriptor.health.clone();
        apply_probe(&mut entry.health, outcome, &config);
        entry.health.last_probe_at = Some(Utc::now());
        entry.health.last_probe_latency_ms = latency_ms;
        let after = entry.health.state;

        if before != after {
            info!(agent = name, from = %before, to = %after, "health state transition");
        }
        Some((before, after))
    }

    /// Manual restart signal for a Dead agent; the next successful probe
    /// brings it back to Healthy.
    pub fn request_restart(&self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(mut entry) => {
                entry.health.restart_requested = true;
                info!(agent = name, state = %entry.health.state, "restart signal recorded");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
