//! End-to-end mesh tests: discovery admission, monitor-driven health
//! transitions, routing and fallback degradation.

mod common;

use common::{descriptor, ScriptedConnector};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use switchboard::{
    DiscoveryService, FallbackPolicy, FallbackTier, HealthMonitor, HealthMonitorConfig,
    HealthState, LoadBalanceStrategy, MeshError, Registry, RouteRequest, Router, RouterConfig,
    ServedBy,
};

struct Mesh {
    registry: Arc<Registry>,
    discovery: Arc<DiscoveryService>,
    monitor: Arc<HealthMonitor>,
    router: Arc<Router>,
    connector: Arc<ScriptedConnector>,
}

fn mesh(strategy: LoadBalanceStrategy) -> Mesh {
    let registry = Arc::new(Registry::new());
    let discovery = Arc::new(DiscoveryService::new(Arc::clone(&registry)));
    let connector = Arc::new(ScriptedConnector::new());
    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&registry),
        Arc::clone(&connector) as _,
        HealthMonitorConfig {
            probe_concurrency: 5,
            scheduler_tick_ms: 10,
        },
    ));
    let fallback = Arc::new(FallbackPolicy::new(Duration::from_secs(60)));
    let router = Arc::new(Router::new(
        Arc::clone(&discovery),
        Arc::clone(&connector) as _,
        fallback,
        RouterConfig {
            strategy,
            retry_budget: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        },
    ));
    Mesh {
        registry,
        discovery,
        monitor,
        router,
        connector,
    }
}

#[tokio::test]
async fn scenario_one_healthy_one_dead_all_calls_land_healthy() {
    let mesh = mesh(LoadBalanceStrategy::RoundRobin);
    mesh.discovery
        .register(descriptor("sage", &["strategy.analyze"]))
        .unwrap();
    mesh.discovery
        .register(descriptor("relic", &["strategy.analyze"]))
        .unwrap();

    // Both come up Healthy, then relic fails probes until it is Dead.
    mesh.monitor.sweep_once().await;
    mesh.connector.set_probe_ok("relic", false);
    for _ in 0..10 {
        mesh.monitor.sweep_once().await;
    }
    assert_eq!(
        mesh.registry.get("sage").unwrap().health.state,
        HealthState::Healthy
    );
    assert_eq!(
        mesh.registry.get("relic").unwrap().health.state,
        HealthState::Dead
    );

    for _ in 0..5 {
        let routed = mesh
            .router
            .route(RouteRequest::new("strategy.analyze", json!({})))
            .await
            .unwrap();
        assert_eq!(
            routed.served_by,
            ServedBy::Agent {
                name: "sage".to_string()
            }
        );
    }
    assert_eq!(mesh.connector.calls_to("sage"), 5);
    assert_eq!(mesh.connector.calls_to("relic"), 0);
}

#[tokio::test]
async fn round_robin_spreads_within_one() {
    let mesh = mesh(LoadBalanceStrategy::RoundRobin);
    for name in ["a", "b", "c"] {
        mesh.discovery
            .register(descriptor(name, &["content.write"]))
            .unwrap();
    }
    mesh.monitor.sweep_once().await;

    // 13 calls across 3 candidates: counts differ by at most one.
    for _ in 0..13 {
        mesh.router
            .route(RouteRequest::new("content.write", json!({})))
            .await
            .unwrap();
    }
    let counts: Vec<u64> = ["a", "b", "c"]
        .iter()
        .map(|n| mesh.connector.calls_to(n))
        .collect();
    let min = counts.iter().min().unwrap();
    let max = counts.iter().max().unwrap();
    assert_eq!(counts.iter().sum::<u64>(), 13);
    assert!(max - min <= 1, "uneven distribution: {counts:?}");
}

#[tokio::test]
async fn unknown_agents_are_not_routable() {
    let mesh = mesh(LoadBalanceStrategy::RoundRobin);
    mesh.discovery
        .register(descriptor("fresh", &["lead.score"]))
        .unwrap();
    // No sweep ran: the agent is still Unknown.

    let err = mesh
        .router
        .route(RouteRequest::new("lead.score", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::UnableToServe { .. }));
    assert_eq!(mesh.connector.calls_to("fresh"), 0);
}

#[tokio::test]
async fn degraded_capability_serves_cache_then_errors() {
    let mesh = mesh(LoadBalanceStrategy::RoundRobin);
    mesh.discovery
        .register(descriptor("quoter", &["quote.generate"]))
        .unwrap();
    mesh.monitor.sweep_once().await;

    let request = RouteRequest::new("quote.generate", json!({"customer": 42}));
    let routed = mesh.router.route(request.clone()).await.unwrap();
    assert!(matches!(routed.served_by, ServedBy::Agent { .. }));

    // The agent drops out of the mesh entirely.
    mesh.connector.set_probe_ok("quoter", false);
    for _ in 0..3 {
        mesh.monitor.sweep_once().await;
    }
    assert_eq!(
        mesh.registry.get("quoter").unwrap().health.state,
        HealthState::Unhealthy
    );

    // Same request key: the cached response answers.
    let routed = mesh.router.route(request).await.unwrap();
    assert_eq!(routed.served_by, ServedBy::Fallback(FallbackTier::Cache));
    assert_eq!(routed.payload, json!({"agent": "quoter", "ok": true}));

    // A different request key misses the cache and fails without a default.
    let err = mesh
        .router
        .route(RouteRequest::new("quote.generate", json!({"customer": 7})))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::UnableToServe { .. }));
}

#[tokio::test]
async fn dead_agent_recovers_through_restart_signal() {
    let mesh = mesh(LoadBalanceStrategy::RoundRobin);
    mesh.discovery
        .register(descriptor("navi", &["task.manage"]))
        .unwrap();

    mesh.monitor.sweep_once().await;
    mesh.connector.set_probe_ok("navi", false);
    for _ in 0..10 {
        mesh.monitor.sweep_once().await;
    }
    assert_eq!(
        mesh.registry.get("navi").unwrap().health.state,
        HealthState::Dead
    );

    // Probes succeed again, but Dead is sticky without the signal.
    mesh.connector.set_probe_ok("navi", true);
    mesh.monitor.sweep_once().await;
    assert_eq!(
        mesh.registry.get("navi").unwrap().health.state,
        HealthState::Dead
    );

    mesh.registry.request_restart("navi");
    mesh.monitor.sweep_once().await;
    assert_eq!(
        mesh.registry.get("navi").unwrap().health.state,
        HealthState::Healthy
    );
}

#[tokio::test]
async fn fan_out_aggregates_with_partial_failure() {
    let mesh = mesh(LoadBalanceStrategy::RoundRobin);
    mesh.discovery
        .register(descriptor("writer", &["content.write"]))
        .unwrap();
    mesh.discovery
        .register(descriptor("scorer", &["lead.score"]))
        .unwrap();
    mesh.connector.set_probe_ok("scorer", false);
    mesh.monitor.sweep_once().await;

    let results = mesh
        .router
        .fan_out(vec![
            RouteRequest::new("content.write", json!({})),
            RouteRequest::new("lead.score", json!({})),
        ])
        .await;

    let writer = results
        .iter()
        .find(|(cap, _)| cap == "content.write")
        .unwrap();
    assert!(writer.1.is_ok());

    let scorer = results.iter().find(|(cap, _)| cap == "lead.score").unwrap();
    assert!(matches!(
        scorer.1.as_ref().unwrap_err(),
        MeshError::UnableToServe { .. }
    ));
}

#[test]
fn strategy_parses_from_config_strings() {
    assert_eq!(
        LoadBalanceStrategy::from_str("round_robin").unwrap(),
        LoadBalanceStrategy::RoundRobin
    );
    assert_eq!(
        LoadBalanceStrategy::from_str("least_connections").unwrap(),
        LoadBalanceStrategy::LeastConnections
    );
    assert_eq!(
        LoadBalanceStrategy::from_str("random").unwrap(),
        LoadBalanceStrategy::Random
    );
    assert!(LoadBalanceStrategy::from_str("weighted").is_err());
}
