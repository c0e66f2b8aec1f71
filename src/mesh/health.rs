//! Health monitor — periodic, concurrency-bounded liveness probes.
//!
//! Each agent is probed on its own cadence (`ProbeConfig.interval_ms`).
//! Dispatch is bounded by a counting semaphore shared across the whole
//! registry, so a large registry cannot open unbounded outbound
//! connections; a full pool delays the next probe instead of dropping it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::Registry;
use super::traits::AgentConnector;
use super::types::{EntrySnapshot, ProbeOutcome};
use crate::services::Metrics;

/// Monitor-level configuration (per-agent cadence lives on the descriptor)
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Maximum probes in flight at once
    pub probe_concurrency: usize,
    /// Scheduler tick resolution (ms)
    pub scheduler_tick_ms: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: 5,
            scheduler_tick_ms: 250,
        }
    }
}

pub struct HealthMonitor {
    registry: Arc<Registry>,
    connector: Arc<dyn AgentConnector>,
    permits: Arc<Semaphore>,
    next_due: DashMap<String, Instant>,
    running: Arc<AtomicBool>,
    config: HealthMonitorConfig,
    metrics: Option<Arc<Metrics>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<Registry>,
        connector: Arc<dyn AgentConnector>,
        config: HealthMonitorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.probe_concurrency.max(1)));
        Self {
            registry,
            connector,
            permits,
            next_due: DashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the monitor loop. Probes fire per-agent on each agent's own
    /// interval; the loop only schedules, the semaphore bounds execution.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = Arc::clone(self);
        info!(
            concurrency = monitor.config.probe_concurrency,
            "health monitor started"
        );

        tokio::spawn(async move {
            let tick = Duration::from_millis(monitor.config.scheduler_tick_ms.max(10));
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while monitor.running.load(Ordering::SeqCst) {
                interval.tick().await;
                monitor.dispatch_due();
            }

            info!("health monitor stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn probes for every agent whose cadence has elapsed.
    fn dispatch_due(self: &Arc<Self>) {
        let now = Instant::now();
        let entries = self.registry.all();

        // Drop schedule entries for deregistered agents.
        self.next_due
            .retain(|name, _| entries.iter().any(|e| &e.descriptor.name == name));

        for entry in entries {
            let name = entry.descriptor.name.clone();
            let interval = Duration::from_millis(entry.descriptor.health.interval_ms);
            let due = self
                .next_due
                .get(&name)
                .map(|d| *d)
                .unwrap_or(now);

            if due > now {
                continue;
            }
            self.next_due.insert(name, now + interval);

            let monitor = Arc::clone(self);
            tokio::spawn(async move {
                monitor.probe_agent(entry).await;
            });
        }
    }

    /// Probe every registered agent once and wait for all results.
    /// Deterministic entry point for tests and operator-triggered sweeps;
    /// the same semaphore bound applies.
    pub async fn sweep_once(self: &Arc<Self>) {
        let entries = self.registry.all();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let monitor = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                monitor.probe_agent(entry).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// One probe against one agent: acquire a worker slot, apply the
    /// per-probe timeout, record the result atomically on the entry.
    async fn probe_agent(&self, entry: EntrySnapshot) {
        let name = entry.descriptor.name.clone();
        let timeout = Duration::from_millis(entry.descriptor.health.timeout_ms);

        // Backpressure point: wait for a free worker slot.
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed during shutdown
        };

        if let Some(metrics) = &self.metrics {
            Metrics::inc(&metrics.probes_dispatched);
        }

        let started = Instant::now();
        let result =
            tokio::time::timeout(timeout, self.connector.probe(&entry.descriptor)).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        drop(permit);

        let outcome = match result {
            Ok(Ok(())) => ProbeOutcome::Success,
            Ok(Err(err)) => {
                debug!(agent = %name, error = %err, "probe failed");
                ProbeOutcome::Failure
            }
            Err(_) => {
                debug!(agent = %name, timeout_ms = entry.descriptor.health.timeout_ms, "probe timed out");
                ProbeOutcome::Failure
            }
        };

        if outcome == ProbeOutcome::Failure {
            if let Some(metrics) = &self.metrics {
                Metrics::inc(&metrics.probe_failures);
            }
        }

        match self.registry.record_probe(&name, outcome, Some(latency_ms)) {
            Some((before, after)) if before != after => {
                warn!(agent = %name, from = %before, to = %after, "agent health changed");
            }
            Some(_) => {}
            None => debug!(agent = %name, "agent deregistered mid-probe; result dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentCallError;
    use crate::mesh::types::{
        AgentDescriptor, Endpoint, HealthState, ProbeConfig,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    /// Connector whose probes fail until a switch is flipped, tracking the
    /// maximum number of concurrent probes it ever observed.
    struct FlakyConnector {
        healthy: AtomicBool,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        delay: Duration,
    }

    impl FlakyConnector {
        fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
                delay: Duration::from_millis(20),
            }
        }
    }

    #[async_trait]
    impl AgentConnector for FlakyConnector {
        async fn call(
            &self,
            _descriptor: &AgentDescriptor,
            _capability: &str,
            _payload: &Value,
        ) -> Result<Value, AgentCallError> {
            unreachable!("monitor never calls")
        }

        async fn probe(&self, _descriptor: &AgentDescriptor) -> Result<(), AgentCallError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AgentCallError::Unreachable {
                    reason: "connection refused".to_string(),
                })
            }
        }
    }

    fn descriptor(name: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec!["task.manage".to_string()],
            endpoints: vec![Endpoint {
                protocol: "http".to_string(),
                address: format!("http://localhost:9000/{name}"),
                operations: vec![],
            }],
            health: ProbeConfig::default(),
            metadata: HashMap::new(),
        }
    }

    fn monitor_with(
        connector: Arc<dyn AgentConnector>,
        concurrency: usize,
    ) -> (Arc<Registry>, Arc<HealthMonitor>) {
        let registry = Arc::new(Registry::new());
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            connector,
            HealthMonitorConfig {
                probe_concurrency: concurrency,
                scheduler_tick_ms: 10,
            },
        ));
        (registry, monitor)
    }

    #[tokio::test]
    async fn test_sweep_marks_agents_healthy() {
        let connector = Arc::new(FlakyConnector::new(true));
        let (registry, monitor) = monitor_with(connector, 5);
        registry.insert(descriptor("navi"));

        monitor.sweep_once().await;
        assert_eq!(
            registry.get("navi").unwrap().health.state,
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_scenario_navi_unhealthy_then_recovers() {
        let connector = Arc::new(FlakyConnector::new(true));
        let (registry, monitor) = monitor_with(Arc::clone(&connector) as _, 5);
        registry.insert(descriptor("navi"));

        monitor.sweep_once().await;
        assert_eq!(
            registry.get("navi").unwrap().health.state,
            HealthState::Healthy
        );

        connector.healthy.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            monitor.sweep_once().await;
        }
        assert_eq!(
            registry.get("navi").unwrap().health.state,
            HealthState::Unhealthy
        );

        connector.healthy.store(true, Ordering::SeqCst);
        for _ in 0..2 {
            monitor.sweep_once().await;
        }
        assert_eq!(
            registry.get("navi").unwrap().health.state,
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_probe_concurrency_is_bounded() {
        let connector = Arc::new(FlakyConnector::new(true));
        let (registry, monitor) = monitor_with(Arc::clone(&connector) as _, 3);
        for i in 0..12 {
            registry.insert(descriptor(&format!("agent-{i}")));
        }

        monitor.sweep_once().await;
        assert!(connector.max_in_flight.load(Ordering::SeqCst) <= 3);
        // Every agent was still probed.
        for i in 0..12 {
            let snap = registry.get(&format!("agent-{i}")).unwrap();
            assert!(snap.health.last_probe_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        struct SlowConnector;

        #[async_trait]
        impl AgentConnector for SlowConnector {
            async fn call(
                &self,
                _descriptor: &AgentDescriptor,
                _capability: &str,
                _payload: &Value,
            ) -> Result<Value, AgentCallError> {
                unreachable!()
            }

            async fn probe(&self, _descriptor: &AgentDescriptor) -> Result<(), AgentCallError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let (registry, monitor) = monitor_with(Arc::new(SlowConnector), 5);
        let mut desc = descriptor("slow");
        desc.health.timeout_ms = 25;
        registry.insert(desc);

        monitor.sweep_once().await;
        let snap = registry.get("slow").unwrap();
        assert_eq!(snap.health.consecutive_failures, 1);
    }
}
