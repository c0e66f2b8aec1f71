//! Approval bridge — suspends callers on external human decisions.
//!
//! Each pending approval owns a single-resolution oneshot pair: the
//! record's terminal transition happens under the record entry guard, so
//! a resolution and an expiry racing on one id have exactly one winner,
//! and only the winner ever reaches the waiter.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    classify_confidence, ApprovalEvent, ApprovalOutcome, ApprovalRecord, ApprovalStatus,
    ApprovalTicket, Decision, DecisionMeta, ReviewTier,
};
use crate::error::{MeshError, Result};
use crate::services::Metrics;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct ApprovalBridgeConfig {
    /// Time-to-live for a pending record
    pub ttl: Duration,
    /// Confidence above which actions execute without review
    pub auto_execute_threshold: f64,
    /// Confidence below which actions require full review
    pub full_review_threshold: f64,
}

impl Default for ApprovalBridgeConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            auto_execute_threshold: 0.85,
            full_review_threshold: 0.60,
        }
    }
}

/// Acknowledgement returned to resolvers (always idempotent, never an
/// error to the notifier)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAck {
    /// The transition landed and the waiter (if any) was notified
    Applied,
    /// The record was already terminal; logged, nothing changed
    AlreadyTerminal(ApprovalStatus),
    /// No record with this id exists
    Unknown,
}

pub struct ApprovalBridge {
    records: DashMap<Uuid, ApprovalRecord>,
    waiter_senders: DashMap<Uuid, oneshot::Sender<ApprovalOutcome>>,
    waiter_receivers: DashMap<Uuid, oneshot::Receiver<ApprovalOutcome>>,
    event_tx: broadcast::Sender<ApprovalEvent>,
    config: ApprovalBridgeConfig,
    metrics: Option<Arc<Metrics>>,
}

impl ApprovalBridge {
    pub fn new(config: ApprovalBridgeConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            records: DashMap::new(),
            waiter_senders: DashMap::new(),
            waiter_receivers: DashMap::new(),
            event_tx,
            config,
            metrics: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ApprovalBridgeConfig::default())
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to approval lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.event_tx.subscribe()
    }

    /// Classify the action and, unless it auto-executes, create a Pending
    /// record with a registered waiter and an expiry timer.
    pub fn request_approval(
        self: &Arc<Self>,
        action: &str,
        context: Value,
        confidence: f64,
    ) -> ApprovalTicket {
        let tier = classify_confidence(
            confidence,
            self.config.auto_execute_threshold,
            self.config.full_review_threshold,
        );

        if tier == ReviewTier::AutoExecute {
            info!(action, confidence, "action auto-executed without review");
            if let Some(metrics) = &self.metrics {
                Metrics::inc(&metrics.approvals_auto_executed);
            }
            return ApprovalTicket::AutoExecute;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.config.ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let record = ApprovalRecord {
            id,
            action: action.to_string(),
            context,
            tier,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            resolved_at: None,
            decided_by: None,
            reason: None,
        };
        self.records.insert(id, record);

        let (tx, rx) = oneshot::channel();
        self.waiter_senders.insert(id, tx);
        self.waiter_receivers.insert(id, rx);

        if let Some(metrics) = &self.metrics {
            Metrics::inc(&metrics.approvals_created);
        }
        let _ = self.event_tx.send(ApprovalEvent::Created {
            id,
            action: action.to_string(),
            tier,
            expires_at,
        });
        info!(approval = %id, action, %tier, "approval record created");

        // Expiry is enforced by the bridge itself: the broker may never
        // deliver a resolution.
        let bridge = Arc::clone(self);
        let ttl = self.config.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            bridge.expire(id);
        });

        ApprovalTicket::Pending { id, tier }
    }

    /// Suspend until a resolution arrives, the record expires, or the
    /// caller's own deadline elapses.
    ///
    /// Deadline expiry releases only this caller's wait: the record keeps
    /// its Pending status and may still be resolved later (the resolution
    /// is then undeliverable and dropped with a debug log).
    pub async fn await_decision(
        &self,
        id: Uuid,
        deadline: Option<Duration>,
    ) -> Result<ApprovalOutcome> {
        let (_, receiver) = self.waiter_receivers.remove(&id).ok_or_else(|| {
            if self.records.contains_key(&id) {
                MeshError::ApprovalAlreadyAwaited(id)
            } else {
                MeshError::ApprovalNotFound(id)
            }
        })?;

        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, receiver).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(approval = %id, "caller stopped waiting before a decision arrived");
                    return Err(MeshError::DecisionWaitTimeout(id));
                }
            },
            None => receiver.await,
        };

        outcome.map_err(|_| {
            MeshError::Internal(format!("waiter channel for approval {id} closed unresolved"))
        })
    }

    /// Apply an external decision. Idempotent: a record already out of
    /// Pending is left untouched and the duplicate is only logged.
    pub fn resolve(&self, id: Uuid, decision: Decision, meta: DecisionMeta) -> ResolveAck {
        let (status, outcome) = match decision {
            Decision::Approved => (
                ApprovalStatus::Approved,
                ApprovalOutcome::Approved(meta.clone()),
            ),
            Decision::Rejected => (
                ApprovalStatus::Rejected,
                ApprovalOutcome::Rejected(meta.clone()),
            ),
        };

        let ack = self.transition(id, status, Some(meta), outcome);
        if ack == ResolveAck::Applied {
            if let Some(metrics) = &self.metrics {
                Metrics::inc(&metrics.approvals_resolved);
            }
            let _ = self.event_tx.send(ApprovalEvent::Resolved { id, decision });
        }
        ack
    }

    /// Apply an explicit human cancellation.
    pub fn cancel(&self, id: Uuid) -> ResolveAck {
        let ack = self.transition(id, ApprovalStatus::Cancelled, None, ApprovalOutcome::Cancelled);
        if ack == ResolveAck::Applied {
            let _ = self.event_tx.send(ApprovalEvent::Cancelled { id });
        }
        ack
    }

    /// TTL expiry: transition to Expired and deliver Expired to any
    /// still-registered waiter.
    pub fn expire(&self, id: Uuid) -> ResolveAck {
        let ack = self.transition(id, ApprovalStatus::Expired, None, ApprovalOutcome::Expired);
        if ack == ResolveAck::Applied {
            info!(approval = %id, "approval expired without a decision");
            if let Some(metrics) = &self.metrics {
                Metrics::inc(&metrics.approvals_expired);
            }
            let _ = self.event_tx.send(ApprovalEvent::Expired { id });
        }
        ack
    }

    pub fn record(&self, id: Uuid) -> Option<ApprovalRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .count()
    }

    /// Single transition point out of Pending.
    ///
    /// The status check and write happen under the record's entry guard:
    /// whichever transition observes Pending first wins, every later one
    /// is a no-op. Only the winner removes the waiter sender, so at most
    /// one outcome is ever delivered.
    fn transition(
        &self,
        id: Uuid,
        to: ApprovalStatus,
        meta: Option<DecisionMeta>,
        outcome: ApprovalOutcome,
    ) -> ResolveAck {
        {
            let Some(mut record) = self.records.get_mut(&id) else {
                warn!(approval = %id, target = %to, "transition for unknown approval id ignored");
                return ResolveAck::Unknown;
            };
            if record.status.is_terminal() {
                let current = record.status;
                drop(record);
                warn!(
                    approval = %id,
                    current = %current,
                    attempted = %to,
                    "duplicate resolution ignored"
                );
                if let Some(metrics) = &self.metrics {
                    Metrics::inc(&metrics.duplicate_resolutions);
                }
                return ResolveAck::AlreadyTerminal(current);
            }

            record.status = to;
            record.resolved_at = Some(Utc::now());
            if let Some(meta) = meta {
                record.decided_by = meta.decided_by;
                record.reason = meta.reason;
            }
        }

        // Only the winning transition reaches the sender; the oneshot
        // buffers the outcome for a caller that has not claimed its
        // receiver yet.
        if let Some((_, sender)) = self.waiter_senders.remove(&id) {
            if sender.send(outcome).is_err() {
                debug!(approval = %id, "resolution undeliverable: caller stopped waiting");
            }
        }
        ResolveAck::Applied
    }
}
