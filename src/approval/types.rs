//! Core types for the approval coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of an approval record.
///
/// A record leaves Pending exactly once and never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Cancelled => write!(f, "cancelled"),
            ApprovalStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Review tier chosen by the confidence classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTier {
    /// High confidence: execute without review, audit-logged
    AutoExecute,
    /// Mid confidence: lightweight reviewer context
    QuickApproval,
    /// Low confidence: full reviewer context
    FullReview,
}

impl std::fmt::Display for ReviewTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewTier::AutoExecute => write!(f, "auto_execute"),
            ReviewTier::QuickApproval => write!(f, "quick_approval"),
            ReviewTier::FullReview => write!(f, "full_review"),
        }
    }
}

/// Pure classification from a confidence score to a review tier.
///
/// `auto_threshold` is exclusive (a score exactly at it still needs
/// review); `full_threshold` is inclusive on the quick-approval side.
pub fn classify_confidence(
    confidence: f64,
    auto_threshold: f64,
    full_threshold: f64,
) -> ReviewTier {
    if confidence > auto_threshold {
        ReviewTier::AutoExecute
    } else if confidence >= full_threshold {
        ReviewTier::QuickApproval
    } else {
        ReviewTier::FullReview
    }
}

/// External decision on a pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Who decided and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionMeta {
    pub decided_by: Option<String>,
    pub reason: Option<String>,
}

/// Typed terminal outcome delivered to a waiting caller.
///
/// Never collapsed into a generic failure: the caller branches on which
/// terminal state actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved(DecisionMeta),
    Rejected(DecisionMeta),
    Cancelled,
    Expired,
}

/// One approval record, created on request, mutated exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    /// The action awaiting sign-off
    pub action: String,
    /// Context payload shown to the reviewer
    pub context: Value,
    pub tier: ReviewTier,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub reason: Option<String>,
}

/// Result of `request_approval`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalTicket {
    /// Confidence cleared the bar; no record created, proceed immediately
    AutoExecute,
    /// A pending record awaits an external decision
    Pending { id: Uuid, tier: ReviewTier },
}

impl ApprovalTicket {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            ApprovalTicket::AutoExecute => None,
            ApprovalTicket::Pending { id, .. } => Some(*id),
        }
    }
}

/// Notifications pushed to interested parties (and the UI)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    #[serde(rename = "approval.created")]
    Created {
        id: Uuid,
        action: String,
        tier: ReviewTier,
        expires_at: DateTime<Utc>,
    },
    #[serde(rename = "approval.resolved")]
    Resolved { id: Uuid, decision: Decision },
    #[serde(rename = "approval.cancelled")]
    Cancelled { id: Uuid },
    #[serde(rename = "approval.expired")]
    Expired { id: Uuid },
}

/// Inbound notification accepted by the event broker (at-least-once)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionNotification {
    Resolved {
        id: Uuid,
        decision: Decision,
        #[serde(default)]
        decided_by: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Cancelled { id: Uuid },
}

impl DecisionNotification {
    pub fn approval_id(&self) -> Uuid {
        match self {
            DecisionNotification::Resolved { id, .. } => *id,
            DecisionNotification::Cancelled { id } => *id,
        }
    }
}
