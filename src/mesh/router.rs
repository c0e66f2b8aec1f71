//! Router and load balancer — capability resolution, candidate
//! selection, bounded retry with backoff, and fallback conversion.

use dashmap::DashMap;
use futures::future::join_all;
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::discovery::DiscoveryService;
use super::fallback::{FallbackPolicy, FallbackResult, FallbackTier};
use super::traits::AgentConnector;
use super::types::{EntrySnapshot, RouteRequest};
use crate::error::{AgentCallError, MeshError, Result};
use crate::services::Metrics;

/// Candidate selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    /// Rotating index per capability
    RoundRobin,
    /// Candidate with the fewest in-flight calls
    LeastConnections,
    /// Uniform random choice
    Random,
}

impl FromStr for LoadBalanceStrategy {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round_robin" => Ok(LoadBalanceStrategy::RoundRobin),
            "least_connections" => Ok(LoadBalanceStrategy::LeastConnections),
            "random" => Ok(LoadBalanceStrategy::Random),
            other => Err(MeshError::Internal(format!(
                "unknown load balance strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub strategy: LoadBalanceStrategy,
    /// Total attempts per request, including the first
    pub retry_budget: u32,
    /// Base delay for exponential backoff between attempts
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay
    pub backoff_max: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::RoundRobin,
            retry_budget: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }
}

/// Who ultimately served a route request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServedBy {
    /// A healthy agent answered
    Agent { name: String },
    /// A fallback tier answered (cache or default)
    Fallback(FallbackTier),
}

/// A served route response
#[derive(Debug, Clone)]
pub struct Routed {
    pub payload: Value,
    pub served_by: ServedBy,
}

pub struct Router {
    discovery: Arc<DiscoveryService>,
    connector: Arc<dyn AgentConnector>,
    fallback: Arc<FallbackPolicy>,
    config: RouterConfig,
    /// Rotating round-robin cursor per capability
    rr_cursors: DashMap<String, usize>,
    /// In-flight calls per agent (least-connections input)
    in_flight: DashMap<String, usize>,
    /// Total attempts per agent (observability)
    attempts: DashMap<String, u64>,
    metrics: Option<Arc<Metrics>>,
}

impl Router {
    pub fn new(
        discovery: Arc<DiscoveryService>,
        connector: Arc<dyn AgentConnector>,
        fallback: Arc<FallbackPolicy>,
        config: RouterConfig,
    ) -> Self {
        Self {
            discovery,
            connector,
            fallback,
            config,
            rr_cursors: DashMap::new(),
            in_flight: DashMap::new(),
            attempts: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Route one request to a healthy agent, retrying transient failures
    /// against a different candidate up to the retry budget, then
    /// degrading through the fallback ladder.
    pub async fn route(&self, request: RouteRequest) -> Result<Routed> {
        let budget = request.retry_budget.unwrap_or(self.config.retry_budget).max(1);
        let key = FallbackPolicy::request_key(&request.capability, &request.payload);
        let mut tried: HashSet<String> = HashSet::new();
        let mut last_error: Option<AgentCallError> = None;

        for attempt in 0..budget {
            if deadline_passed(request.deadline) {
                debug!(capability = %request.capability, "caller deadline reached, stopping attempts");
                break;
            }

            let healthy: Vec<EntrySnapshot> = self
                .discovery
                .lookup(&request.capability)
                .into_iter()
                .filter(|e| e.health.state.is_routable())
                .collect();

            if healthy.is_empty() {
                // Zero healthy candidates: no retry loop, straight to fallback.
                info!(capability = %request.capability, "no healthy candidate");
                return self.degrade(&request.capability, &key, last_error);
            }

            // A retry must go to a different candidate than earlier attempts.
            let available: Vec<&EntrySnapshot> = healthy
                .iter()
                .filter(|e| !tried.contains(&e.descriptor.name))
                .collect();
            if available.is_empty() {
                debug!(capability = %request.capability, "every healthy candidate already tried");
                break;
            }

            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                if sleep_within_deadline(delay, request.deadline).await {
                    break;
                }
            }

            let selected = self.select(&request.capability, &available).clone();
            let name = selected.descriptor.name.clone();
            tried.insert(name.clone());

            self.begin_attempt(&name);
            let result = match remaining(request.deadline) {
                Some(remaining) => {
                    match tokio::time::timeout(
                        remaining,
                        self.connector
                            .call(&selected.descriptor, &request.capability, &request.payload),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AgentCallError::Timeout {
                            elapsed_ms: remaining.as_millis() as u64,
                        }),
                    }
                }
                None => {
                    self.connector
                        .call(&selected.descriptor, &request.capability, &request.payload)
                        .await
                }
            };
            self.end_attempt(&name);

            match result {
                Ok(value) => {
                    self.fallback.record_success(&key, &value);
                    if let Some(metrics) = &self.metrics {
                        Metrics::inc(&metrics.route_successes);
                    }
                    debug!(capability = %request.capability, agent = %name, attempt, "route served");
                    return Ok(Routed {
                        payload: value,
                        served_by: ServedBy::Agent { name },
                    });
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        capability = %request.capability,
                        agent = %name,
                        attempt,
                        error = %err,
                        "attempt failed, will retry on another candidate"
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    // Non-retryable: propagate immediately, no fallback.
                    warn!(capability = %request.capability, agent = %name, error = %err, "non-retryable agent error");
                    return Err(MeshError::AgentCall(err));
                }
            }
        }

        self.degrade(&request.capability, &key, last_error)
    }

    /// Issue one route per capability concurrently. A failing branch
    /// degrades to its own fallback result without aborting siblings.
    pub async fn fan_out(
        &self,
        requests: Vec<RouteRequest>,
    ) -> Vec<(String, Result<Routed>)> {
        let futures = requests.into_iter().map(|request| {
            let capability = request.capability.clone();
            async move { (capability, self.route(request).await) }
        });
        join_all(futures).await
    }

    /// In-flight call count for one agent.
    pub fn in_flight_count(&self, agent: &str) -> usize {
        self.in_flight.get(agent).map(|c| *c).unwrap_or(0)
    }

    /// Total attempts recorded against one agent.
    pub fn attempt_count(&self, agent: &str) -> u64 {
        self.attempts.get(agent).map(|c| *c).unwrap_or(0)
    }

    fn select<'a>(
        &self,
        capability: &str,
        available: &[&'a EntrySnapshot],
    ) -> &'a EntrySnapshot {
        match self.config.strategy {
            LoadBalanceStrategy::RoundRobin => {
                let mut cursor = self.rr_cursors.entry(capability.to_string()).or_insert(0);
                let index = *cursor % available.len();
                *cursor = cursor.wrapping_add(1);
                available[index]
            }
            LoadBalanceStrategy::LeastConnections => available
                .iter()
                .copied()
                .min_by_key(|e| self.in_flight_count(&e.descriptor.name))
                .expect("available is non-empty"),
            LoadBalanceStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..available.len());
                available[index]
            }
        }
    }

    fn begin_attempt(&self, agent: &str) {
        *self.in_flight.entry(agent.to_string()).or_insert(0) += 1;
        *self.attempts.entry(agent.to_string()).or_insert(0) += 1;
        if let Some(metrics) = &self.metrics {
            Metrics::inc(&metrics.route_attempts);
        }
    }

    fn end_attempt(&self, agent: &str) {
        if let Some(mut count) = self.in_flight.get_mut(agent) {
            *count = count.saturating_sub(1);
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(16));
        let capped = exp.min(self.config.backoff_max.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
        Duration::from_millis(capped + jitter)
    }

    fn degrade(
        &self,
        capability: &str,
        key: &str,
        last_error: Option<AgentCallError>,
    ) -> Result<Routed> {
        match self.fallback.resolve(capability, key) {
            FallbackResult::Cached(value) => {
                if let Some(metrics) = &self.metrics {
                    Metrics::inc(&metrics.fallback_cache_hits);
                }
                Ok(Routed {
                    payload: value,
                    served_by: ServedBy::Fallback(FallbackTier::Cache),
                })
            }
            FallbackResult::Default(value) => {
                if let Some(metrics) = &self.metrics {
                    Metrics::inc(&metrics.fallback_defaults);
                }
                Ok(Routed {
                    payload: value,
                    served_by: ServedBy::Fallback(FallbackTier::Default),
                })
            }
            FallbackResult::Unavailable => {
                if let Some(metrics) = &self.metrics {
                    Metrics::inc(&metrics.route_unserved);
                }
                Err(MeshError::UnableToServe {
                    capability: capability.to_string(),
                    last_error: last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no healthy candidate".to_string()),
                })
            }
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Sleep for `delay`, clamped to the deadline. Returns true when the
/// deadline cut the sleep short.
async fn sleep_within_deadline(delay: Duration, deadline: Option<Instant>) -> bool {
    match remaining(deadline) {
        Some(rem) if rem <= delay => {
            tokio::time::sleep(rem).await;
            true
        }
        _ => {
            tokio::time::sleep(delay).await;
            false
        }
    }
}
