use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::AppConfig;
use switchboard::error::Result;
use switchboard::mesh::{
    DiscoveryService, FallbackPolicy, HealthMonitor, HealthMonitorConfig, LoadBalanceStrategy,
    Registry, Router, RouterConfig,
};
use switchboard::services::{ApiServer, AppState, Metrics};
use switchboard::{ApprovalBridge, ApprovalBridgeConfig, ApprovalEventBroker, HttpConnector};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration, using defaults: {e}");
            AppConfig {
                mesh: Default::default(),
                approval: Default::default(),
                logging: Default::default(),
                api_port: None,
            }
        }
    };
    init_logging(&config);

    if let Err(errors) = config.validate() {
        for msg in &errors {
            error!("config: {msg}");
        }
        return Err(switchboard::MeshError::Internal(
            "invalid configuration".to_string(),
        ));
    }

    info!("starting switchboard coordinator");

    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(Registry::new());
    let discovery = Arc::new(DiscoveryService::new(Arc::clone(&registry)));
    let connector = Arc::new(HttpConnector::new());

    let fallback = Arc::new(FallbackPolicy::new(Duration::from_secs(
        config.mesh.fallback_cache_ttl_secs,
    )));
    let strategy = LoadBalanceStrategy::from_str(&config.mesh.strategy)?;
    let router = Arc::new(
        Router::new(
            Arc::clone(&discovery),
            connector.clone() as _,
            Arc::clone(&fallback),
            RouterConfig {
                strategy,
                retry_budget: config.mesh.retry_budget,
                backoff_base: Duration::from_millis(config.mesh.backoff_base_ms),
                backoff_max: Duration::from_millis(config.mesh.backoff_max_ms),
            },
        )
        .with_metrics(Arc::clone(&metrics)),
    );

    let monitor = Arc::new(
        HealthMonitor::new(
            Arc::clone(&registry),
            connector as _,
            HealthMonitorConfig {
                probe_concurrency: config.mesh.probe_concurrency,
                scheduler_tick_ms: config.mesh.scheduler_tick_ms,
            },
        )
        .with_metrics(Arc::clone(&metrics)),
    );
    let monitor_handle = monitor.start();

    let bridge = Arc::new(
        ApprovalBridge::new(ApprovalBridgeConfig {
            ttl: Duration::from_secs(config.approval.ttl_secs),
            auto_execute_threshold: config.approval.auto_execute_threshold,
            full_review_threshold: config.approval.full_review_threshold,
        })
        .with_metrics(Arc::clone(&metrics)),
    );
    let broker = Arc::new(ApprovalEventBroker::new(Arc::clone(&bridge)));

    let state = Arc::new(AppState {
        registry,
        discovery,
        router,
        bridge,
        broker,
        metrics,
        started_at: Utc::now(),
    });
    let api = ApiServer::new(state, config.api_port.unwrap_or(8080));

    tokio::select! {
        result = api.run() => {
            if let Err(e) = result {
                error!("control API exited: {e}");
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    monitor.stop();
    monitor_handle.abort();
    info!("switchboard coordinator stopped");
    Ok(())
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,switchboard={}", config.logging.level)));

    // Optional daily-rotating file output. `tracing_appender::rolling::daily`
    // panics if it cannot create the initial file, so preflight writability.
    let file_layer = config.logging.directory.as_deref().and_then(|log_dir| {
        if std::fs::create_dir_all(log_dir).is_err() {
            eprintln!("Warning: could not create log directory {log_dir}, file logging disabled");
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".switchboard_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "switchboard.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Keep the guard alive for the process lifetime.
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: could not write to log directory {log_dir} ({e}), file logging disabled");
                None
            }
        }
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().boxed())
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer.boxed())
            .with(file_layer)
            .init();
    }

    if let Some(dir) = &config.logging.directory {
        warn!("file logging enabled under {dir}");
    }
}
