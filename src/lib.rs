pub mod adapters;
pub mod approval;
pub mod config;
pub mod error;
pub mod mesh;
pub mod services;

pub use adapters::HttpConnector;
pub use approval::{
    ApprovalBridge, ApprovalBridgeConfig, ApprovalEventBroker, ApprovalOutcome, ApprovalRecord,
    ApprovalStatus, ApprovalTicket, BrokerAck, Decision, DecisionMeta, DecisionNotification,
    ResolveAck, ReviewTier,
};
pub use config::AppConfig;
pub use error::{AgentCallError, MeshError, Result};
pub use mesh::{
    AgentConnector, AgentDescriptor, DiscoveryService, Endpoint, EntrySnapshot, FallbackPolicy,
    FallbackTier, HealthMonitor, HealthMonitorConfig, HealthState, LoadBalanceStrategy,
    ProbeConfig, Registry, RouteRequest, Routed, Router, RouterConfig, ServedBy,
};
pub use services::{ApiServer, AppState, Metrics};
