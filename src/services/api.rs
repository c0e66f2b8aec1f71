//! Control API — the external surface of the coordinator.
//!
//! Exposes agent registration and lookup, the routing entry point, the
//! approval surface (create / resolve / cancel) and coordinator health.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::approval::{
    ApprovalBridge, ApprovalEventBroker, ApprovalRecord, ApprovalTicket, BrokerAck, Decision,
    DecisionNotification,
};
use crate::error::MeshError;
use crate::mesh::{
    AgentDescriptor, DiscoveryService, EntrySnapshot, HealthState, Registry, RouteRequest,
    Routed, Router as MeshRouter, ServedBy,
};
use crate::services::Metrics;

/// Shared state for the control API
pub struct AppState {
    pub registry: Arc<Registry>,
    pub discovery: Arc<DiscoveryService>,
    pub router: Arc<MeshRouter>,
    pub bridge: Arc<ApprovalBridge>,
    pub broker: Arc<ApprovalEventBroker>,
    pub metrics: Arc<Metrics>,
    pub started_at: DateTime<Utc>,
}

/// Control API server
pub struct ApiServer {
    state: Arc<AppState>,
    port: u16,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>, port: u16) -> Self {
        Self { state, port }
    }

    pub async fn run(&self) -> crate::Result<()> {
        let app = create_router(Arc::clone(&self.state));
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting control API on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| MeshError::Internal(format!("control API error: {e}")))?;
        Ok(())
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/agents", get(list_agents_handler).post(register_handler))
        .route("/agents/:name", delete(deregister_handler))
        .route("/agents/:name/restart", post(restart_handler))
        .route("/route", post(route_handler))
        .route("/approvals", post(create_approval_handler))
        .route("/approvals/:id", get(get_approval_handler))
        .route("/approvals/:id/resolve", post(resolve_handler))
        .route("/approvals/:id/cancel", post(cancel_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(err: MeshError) -> Response {
    let status = match &err {
        MeshError::RegistrationInvalid(_) => StatusCode::BAD_REQUEST,
        MeshError::AgentNotFound(_) | MeshError::ApprovalNotFound(_) => StatusCode::NOT_FOUND,
        MeshError::ApprovalAlreadyAwaited(_) => StatusCode::CONFLICT,
        MeshError::NoHealthyCandidate { .. } | MeshError::UnableToServe { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        MeshError::AgentCall(_) => StatusCode::BAD_GATEWAY,
        MeshError::DecisionWaitTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

// ==================== health ====================

#[derive(Debug, Serialize)]
struct CoordinatorHealth {
    status: &'static str,
    uptime_seconds: u64,
    agents_total: usize,
    agents_healthy: usize,
    agents_unhealthy: usize,
    agents_dead: usize,
    approvals_pending: usize,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entries = state.registry.all();
    let count = |s: HealthState| entries.iter().filter(|e| e.health.state == s).count();
    let health = CoordinatorHealth {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
        agents_total: entries.len(),
        agents_healthy: count(HealthState::Healthy),
        agents_unhealthy: count(HealthState::Unhealthy),
        agents_dead: count(HealthState::Dead),
        approvals_pending: state.bridge.pending_count(),
    };
    (StatusCode::OK, Json(health))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

// ==================== agents ====================

#[derive(Debug, Serialize)]
struct RegisterResponse {
    name: String,
    state: HealthState,
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<AgentDescriptor>,
) -> Response {
    match state.discovery.register(descriptor) {
        Ok(snapshot) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                name: snapshot.descriptor.name,
                state: snapshot.health.state,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_agents_handler(State(state): State<Arc<AppState>>) -> Json<Vec<EntrySnapshot>> {
    Json(state.registry.all())
}

async fn deregister_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.discovery.deregister(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn restart_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.registry.request_restart(&name) {
        StatusCode::ACCEPTED.into_response()
    } else {
        error_response(MeshError::AgentNotFound(name))
    }
}

// ==================== routing ====================

#[derive(Debug, Deserialize)]
struct RouteBody {
    capability: String,
    #[serde(default)]
    payload: Value,
    /// Caller deadline relative to now (ms)
    timeout_ms: Option<u64>,
    retry_budget: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RouteResponse {
    /// "agent", "cache", "default"
    source: &'static str,
    agent: Option<String>,
    payload: Value,
}

impl From<Routed> for RouteResponse {
    fn from(routed: Routed) -> Self {
        match routed.served_by {
            ServedBy::Agent { name } => RouteResponse {
                source: "agent",
                agent: Some(name),
                payload: routed.payload,
            },
            ServedBy::Fallback(tier) => RouteResponse {
                source: match tier {
                    crate::mesh::FallbackTier::Cache => "cache",
                    crate::mesh::FallbackTier::Default => "default",
                    crate::mesh::FallbackTier::Error => "error",
                },
                agent: None,
                payload: routed.payload,
            },
        }
    }
}

async fn route_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RouteBody>,
) -> Response {
    let mut request = RouteRequest::new(body.capability, body.payload);
    if let Some(timeout_ms) = body.timeout_ms {
        request = request.with_deadline(Instant::now() + Duration::from_millis(timeout_ms));
    }
    if let Some(budget) = body.retry_budget {
        request = request.with_retry_budget(budget);
    }

    match state.router.route(request).await {
        Ok(routed) => (StatusCode::OK, Json(RouteResponse::from(routed))).into_response(),
        Err(err) => error_response(err),
    }
}

// ==================== approvals ====================

#[derive(Debug, Deserialize)]
struct CreateApprovalBody {
    action: String,
    #[serde(default)]
    context: Value,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct CreateApprovalResponse {
    tier: String,
    id: Option<Uuid>,
}

async fn create_approval_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateApprovalBody>,
) -> Response {
    let ticket = state
        .bridge
        .request_approval(&body.action, body.context, body.confidence);
    let response = match ticket {
        ApprovalTicket::AutoExecute => CreateApprovalResponse {
            tier: "auto_execute".to_string(),
            id: None,
        },
        ApprovalTicket::Pending { id, tier } => CreateApprovalResponse {
            tier: tier.to_string(),
            id: Some(id),
        },
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

async fn get_approval_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.bridge.record(id) {
        Some(record) => (StatusCode::OK, Json::<ApprovalRecord>(record)).into_response(),
        None => error_response(MeshError::ApprovalNotFound(id)),
    }
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    decision: Decision,
    decided_by: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct AckResponse {
    ack: &'static str,
}

fn ack_response(id: Uuid, ack: BrokerAck) -> Response {
    match ack {
        BrokerAck::Applied => (StatusCode::OK, Json(AckResponse { ack: "applied" })).into_response(),
        // Idempotent from the notifier's perspective: accepted, no effect.
        BrokerAck::Duplicate => {
            (StatusCode::OK, Json(AckResponse { ack: "duplicate" })).into_response()
        }
        BrokerAck::UnknownApproval => error_response(MeshError::ApprovalNotFound(id)),
    }
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Response {
    let ack = state.broker.handle(DecisionNotification::Resolved {
        id,
        decision: body.decision,
        decided_by: body.decided_by,
        reason: body.reason,
    });
    ack_response(id, ack)
}

async fn cancel_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    let ack = state.broker.handle(DecisionNotification::Cancelled { id });
    ack_response(id, ack)
}
