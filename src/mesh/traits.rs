//! Transport seam between the mesh and individual agents

use async_trait::async_trait;
use serde_json::Value;

use super::types::AgentDescriptor;
use crate::error::AgentCallError;

/// Request/response + health-probe transport for one agent.
///
/// The mesh depends only on this trait; the concrete wire protocol lives
/// in an adapter. Implementations must not retry internally — retry policy
/// belongs to the router, and the health monitor issues at most one probe
/// per agent per sweep.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Issue a capability call against the agent.
    async fn call(
        &self,
        descriptor: &AgentDescriptor,
        capability: &str,
        payload: &Value,
    ) -> Result<Value, AgentCallError>;

    /// Issue a single health probe. Success means the agent answered
    /// within the connector's own transport bounds; the monitor applies
    /// the per-agent timeout on top.
    async fn probe(&self, descriptor: &AgentDescriptor) -> Result<(), AgentCallError>;
}
