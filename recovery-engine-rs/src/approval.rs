//! # Human Approval
//!
//! GATE nodes (and strategies flagged for human oversight) ask an
//! [`ApprovalHandler`] for a decision before anything runs. The interpreter
//! bounds every wait with a timeout; a request that is never answered
//! suspends the run with REQUIRES_APPROVAL.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conditions::Params;

/// What an operator is being asked to approve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: Uuid,
    pub path_id: Uuid,
    pub failure_id: String,
    pub strategy_id: String,
    /// Gate node id, or the strategy id for strategy-level oversight
    pub subject: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Params,
    pub description: String,
    /// Operators or channels to notify about the request
    #[serde(default)]
    pub notify: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

/// An operator's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Approved { approver: Option<String> },
    Denied { approver: Option<String>, reason: Option<String> },
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        ApprovalDecision::Approved { approver: None }
    }

    pub fn deny<S: Into<String>>(reason: S) -> Self {
        ApprovalDecision::Denied {
            approver: None,
            reason: Some(reason.into()),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved { .. })
    }

    pub fn approver(&self) -> Option<&str> {
        match self {
            ApprovalDecision::Approved { approver } | ApprovalDecision::Denied { approver, .. } => {
                approver.as_deref()
            }
        }
    }
}

/// Source of approval decisions
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Waits for a decision. The caller enforces the timeout, so
    /// implementations may wait indefinitely.
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision;
}

/// Approves everything immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        debug!(subject = %request.subject, "Auto-approving gate");
        ApprovalDecision::Approved {
            approver: Some("auto".to_string()),
        }
    }
}

/// Never answers; every gate times out
#[derive(Debug, Default, Clone, Copy)]
pub struct NoApprover;

#[async_trait]
impl ApprovalHandler for NoApprover {
    async fn request_approval(&self, _request: ApprovalRequest) -> ApprovalDecision {
        futures::future::pending().await
    }
}

type Pending = HashMap<Uuid, (ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;

/// Holds requests until an operator resolves them through [`resolve`].
///
/// New requests are also broadcast to subscribers so an operator surface can
/// react without polling.
///
/// [`resolve`]: ChannelApprovalHandler::resolve
#[derive(Debug)]
pub struct ChannelApprovalHandler {
    pending: Mutex<Pending>,
    announcements: broadcast::Sender<ApprovalRequest>,
}

impl Default for ChannelApprovalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelApprovalHandler {
    pub fn new() -> Self {
        let (announcements, _) = broadcast::channel(64);
        Self {
            pending: Mutex::new(HashMap::new()),
            announcements,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receives every request submitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.announcements.subscribe()
    }

    /// Requests currently waiting for a decision
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> =
            self.lock().values().map(|(request, _)| request.clone()).collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    /// Delivers a decision; false when the request is unknown or already gone
    pub fn resolve(&self, request_id: Uuid, decision: ApprovalDecision) -> bool {
        let entry = self.lock().remove(&request_id);
        match entry {
            Some((request, tx)) => {
                info!(
                    request_id = %request_id,
                    subject = %request.subject,
                    approved = decision.is_approved(),
                    "Approval request resolved"
                );
                tx.send(decision).is_ok()
            }
            None => {
                warn!(request_id = %request_id, "Approval request not pending");
                false
            }
        }
    }
}

/// Removes a pending entry when the waiting future is dropped (timeout)
struct PendingGuard<'a> {
    handler: &'a ChannelApprovalHandler,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.handler.lock().remove(&self.request_id);
    }
}

#[async_trait]
impl ApprovalHandler for ChannelApprovalHandler {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let (tx, rx) = oneshot::channel();
        let request_id = request.request_id;

        self.lock().insert(request_id, (request.clone(), tx));
        let _guard = PendingGuard {
            handler: self,
            request_id,
        };

        info!(
            request_id = %request_id,
            subject = %request.subject,
            strategy = %request.strategy_id,
            "Awaiting human approval"
        );
        let _ = self.announcements.send(request);

        match rx.await {
            Ok(decision) => decision,
            Err(_) => ApprovalDecision::Denied {
                approver: None,
                reason: Some("approval channel closed".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            request_id: Uuid::new_v4(),
            path_id: Uuid::new_v4(),
            failure_id: "f-1".to_string(),
            strategy_id: "database_recovery".to_string(),
            subject: "approve_failover".to_string(),
            action: Some("failover_database".to_string()),
            parameters: Params::new(),
            description: "Promote replica".to_string(),
            notify: vec!["oncall-dba".to_string()],
            requested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_handler_resolves() {
        let handler = Arc::new(ChannelApprovalHandler::new());
        let mut announcements = handler.subscribe();

        let waiter = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.request_approval(request()).await })
        };

        let announced = announcements.recv().await.unwrap();
        assert_eq!(handler.pending().len(), 1);
        assert!(handler.resolve(announced.request_id, ApprovalDecision::approve()));

        let decision = waiter.await.unwrap();
        assert!(decision.is_approved());
        assert!(handler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_wait_clears_pending() {
        let handler = ChannelApprovalHandler::new();
        let outcome = tokio::time::timeout(Duration::from_millis(20), handler.request_approval(request())).await;

        assert!(outcome.is_err());
        assert!(handler.pending().is_empty());
        assert!(!handler.resolve(Uuid::new_v4(), ApprovalDecision::deny("late")));
    }

    #[tokio::test]
    async fn test_auto_handlers() {
        assert!(AutoApprove.request_approval(request()).await.is_approved());
        let waited = tokio::time::timeout(Duration::from_millis(10), NoApprover.request_approval(request())).await;
        assert!(waited.is_err());
    }
}
