//! Core types for the agent mesh

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Self-declared manifest for a callable service agent.
///
/// Immutable after admission except for `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent name (registry key)
    pub name: String,
    /// Agent version string
    pub version: String,
    /// Capabilities this agent can serve (must be non-empty)
    pub capabilities: Vec<String>,
    /// Reachable endpoints (must be non-empty)
    pub endpoints: Vec<Endpoint>,
    /// Health probe configuration
    #[serde(default)]
    pub health: ProbeConfig,
    /// Free-form metadata (owning module, tags)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AgentDescriptor {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Primary endpoint used for calls and probes.
    pub fn primary_endpoint(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }
}

/// A single reachable address for an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport protocol (e.g., "http", "https")
    pub protocol: String,
    /// Address, a URL for http(s) protocols
    pub address: String,
    /// Operations supported at this endpoint
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Per-agent health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe path relative to the endpoint address
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    /// Interval between probes for this agent (ms)
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
    /// Per-probe timeout (ms); a timeout counts as a failure
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive failures before Healthy becomes Unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Consecutive successes before Unhealthy becomes Healthy
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
}

fn default_probe_path() -> String {
    "/healthz".to_string()
}

fn default_probe_interval_ms() -> u64 {
    15_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_healthy_threshold() -> u32 {
    2
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_path: default_probe_path(),
            interval_ms: default_probe_interval_ms(),
            timeout_ms: default_probe_timeout_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            healthy_threshold: default_healthy_threshold(),
        }
    }
}

/// Health state of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Never probed successfully; not yet eligible for routing
    Unknown,
    /// Passing probes; eligible for routing
    Healthy,
    /// Failing probes; excluded from routing
    Unhealthy,
    /// Persistently failing; requires a manual restart signal to recover
    Dead,
}

impl HealthState {
    /// Whether the router may select this agent.
    pub fn is_routable(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Dead => write!(f, "dead"),
        }
    }
}

/// Mutable health telemetry attached to a registry entry.
///
/// Mutated only by the health monitor (and the manual restart signal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthTelemetry {
    pub state: HealthState,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_probe_latency_ms: Option<u64>,
    /// Set by the manual restart signal; cleared on the recovery probe
    pub restart_requested: bool,
}

impl Default for HealthTelemetry {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_probe_at: None,
            last_probe_latency_ms: None,
            restart_requested: false,
        }
    }
}

/// Outcome of a single health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

/// Cloneable view of a registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub descriptor: AgentDescriptor,
    pub health: HealthTelemetry,
    pub registered_at: DateTime<Utc>,
    /// Registration sequence number (stable lookup order)
    pub seq: u64,
}

/// A routing request against one capability
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Target capability (e.g., "strategy.analyze")
    pub capability: String,
    /// Request payload forwarded to the selected agent
    pub payload: Value,
    /// Caller-supplied deadline; attempts stop once it has passed
    pub deadline: Option<Instant>,
    /// Total attempts allowed, including the first (router default when None)
    pub retry_budget: Option<u32>,
}

impl RouteRequest {
    pub fn new(capability: impl Into<String>, payload: Value) -> Self {
        Self {
            capability: capability.into(),
            payload,
            deadline: None,
            retry_budget: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = Some(budget);
        self
    }
}
