//! Human-in-the-loop approval coordination — bridge, broker and the
//! confidence classifier.

pub mod bridge;
pub mod broker;
pub mod types;

pub use bridge::{ApprovalBridge, ApprovalBridgeConfig, ResolveAck};
pub use broker::{ApprovalEventBroker, BrokerAck};
pub use types::{
    classify_confidence, ApprovalEvent, ApprovalOutcome, ApprovalRecord, ApprovalStatus,
    ApprovalTicket, Decision, DecisionMeta, DecisionNotification, ReviewTier,
};
