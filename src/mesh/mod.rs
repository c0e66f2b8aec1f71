//! Agent mesh — discovery, registry, health monitoring, routing and
//! fallback.

pub mod discovery;
pub mod fallback;
pub mod health;
pub mod registry;
pub mod router;
pub mod traits;
pub mod types;

pub use discovery::DiscoveryService;
pub use fallback::{FallbackPolicy, FallbackResult, FallbackTier};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use registry::{Registry, DEAD_FAILURE_THRESHOLD};
pub use router::{LoadBalanceStrategy, Routed, Router, RouterConfig, ServedBy};
pub use traits::AgentConnector;
pub use types::{
    AgentDescriptor, Endpoint, EntrySnapshot, HealthState, HealthTelemetry, ProbeConfig,
    ProbeOutcome, RouteRequest,
};
