//! Approval event broker — external-facing entry point for decision and
//! cancellation notifications.
//!
//! Inbound delivery is at-least-once. The broker forwards each approval
//! id to the bridge at most once; the bridge's duplicate no-op contract
//! is what makes redelivery safe regardless.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::bridge::{ApprovalBridge, ResolveAck};
use super::types::{ApprovalEvent, DecisionMeta, DecisionNotification};

/// Acknowledgement to the external notifier (never an error)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAck {
    /// The notification was forwarded and applied
    Applied,
    /// The record was already terminal or the id was already forwarded
    Duplicate,
    /// No approval record with this id exists
    UnknownApproval,
}

pub struct ApprovalEventBroker {
    bridge: Arc<ApprovalBridge>,
    forwarded: DashMap<Uuid, ()>,
}

impl ApprovalEventBroker {
    pub fn new(bridge: Arc<ApprovalBridge>) -> Self {
        Self {
            bridge,
            forwarded: DashMap::new(),
        }
    }

    /// Accept one notification and forward it to the bridge.
    pub fn handle(&self, notification: DecisionNotification) -> BrokerAck {
        let id = notification.approval_id();

        if self.forwarded.contains_key(&id) {
            debug!(approval = %id, "redelivered notification ignored; id already forwarded");
            return BrokerAck::Duplicate;
        }

        let ack = match notification {
            DecisionNotification::Resolved {
                id,
                decision,
                decided_by,
                reason,
            } => self.bridge.resolve(id, decision, DecisionMeta { decided_by, reason }),
            DecisionNotification::Cancelled { id } => self.bridge.cancel(id),
        };

        match ack {
            ResolveAck::Applied => {
                self.forwarded.insert(id, ());
                BrokerAck::Applied
            }
            ResolveAck::AlreadyTerminal(status) => {
                self.forwarded.insert(id, ());
                debug!(approval = %id, %status, "notification for terminal record acknowledged");
                BrokerAck::Duplicate
            }
            ResolveAck::Unknown => {
                warn!(approval = %id, "notification for unknown approval id");
                BrokerAck::UnknownApproval
            }
        }
    }

    /// Subscribe to outbound approval lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ApprovalEvent> {
        self.bridge.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::bridge::ApprovalBridgeConfig;
    use crate::approval::types::{ApprovalOutcome, ApprovalStatus, Decision};
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<ApprovalBridge>, ApprovalEventBroker) {
        let bridge = Arc::new(ApprovalBridge::new(ApprovalBridgeConfig {
            ttl: Duration::from_secs(300),
            ..ApprovalBridgeConfig::default()
        }));
        let broker = ApprovalEventBroker::new(Arc::clone(&bridge));
        (bridge, broker)
    }

    #[tokio::test]
    async fn test_at_least_once_delivery_is_safe() {
        let (bridge, broker) = setup();
        let id = bridge
            .request_approval("lead.convert", json!({}), 0.5)
            .id()
            .unwrap();

        let notification = DecisionNotification::Resolved {
            id,
            decision: Decision::Approved,
            decided_by: Some("ops@acme".to_string()),
            reason: None,
        };

        assert_eq!(broker.handle(notification.clone()), BrokerAck::Applied);
        assert_eq!(broker.handle(notification.clone()), BrokerAck::Duplicate);
        assert_eq!(broker.handle(notification), BrokerAck::Duplicate);

        let outcome = bridge.await_decision(id, None).await.unwrap();
        assert!(matches!(outcome, ApprovalOutcome::Approved(_)));
        assert_eq!(bridge.record(id).unwrap().status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_cancel_after_resolve_does_not_flip_status() {
        let (bridge, broker) = setup();
        let id = bridge
            .request_approval("lead.convert", json!({}), 0.5)
            .id()
            .unwrap();

        broker.handle(DecisionNotification::Resolved {
            id,
            decision: Decision::Rejected,
            decided_by: None,
            reason: None,
        });
        let ack = broker.handle(DecisionNotification::Cancelled { id });
        assert_eq!(ack, BrokerAck::Duplicate);
        assert_eq!(bridge.record(id).unwrap().status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_unknown_id_is_acknowledged_not_errored() {
        let (_bridge, broker) = setup();
        let ack = broker.handle(DecisionNotification::Cancelled { id: Uuid::new_v4() });
        assert_eq!(ack, BrokerAck::UnknownApproval);
    }
}
