//! Approval Broker — suspends a tool call behind human review and
//! resumes the waiting caller once a decision arrives or the request
//! times out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ag_domain::event::ApprovalRequest;
use ag_domain::tool::ToolCall;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cancel::CancelToken;

/// The decision made by a human reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

struct PendingApproval {
    request: ApprovalRequest,
    respond: oneshot::Sender<ApprovalDecision>,
}

/// Thread-safe store of pending tool-call approvals.
///
/// Unlike a bare map, [`ApprovalBroker::wait`] lets a caller block on one
/// specific request with its own deadline, and [`ApprovalBroker::sweep_expired`]
/// resolves-as-denied any request nobody is actively waiting on once its
/// TTL elapses — without this a request whose original waiter already gave
/// up would sit in the map forever.
pub struct ApprovalBroker {
    pending: RwLock<HashMap<String, PendingApproval>>,
    default_ttl: Duration,
}

impl ApprovalBroker {
    pub fn new(default_ttl: Duration) -> Self {
        Self { pending: RwLock::new(HashMap::new()), default_ttl }
    }

    /// Register a new approval request and return it plus a receiver the
    /// caller can await (directly, or via [`ApprovalBroker::wait`]).
    pub fn create(
        &self,
        session_id: impl Into<String>,
        call: ToolCall,
        reason: impl Into<String>,
        ttl: Option<Duration>,
    ) -> (ApprovalRequest, oneshot::Receiver<ApprovalDecision>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            call,
            reason: reason.into(),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
        };
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            request.id.clone(),
            PendingApproval { request: request.clone(), respond: tx },
        );
        (request, rx)
    }

    /// Resolve a pending approval. Returns `true` if a matching request was found.
    pub fn resolve(&self, id: &str, decision: ApprovalDecision) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(decision);
            true
        } else {
            false
        }
    }

    /// Block on one specific approval until it resolves, its own TTL
    /// elapses, or the enclosing turn is cancelled — whichever comes
    /// first. A cancelled wait is treated the same as a timeout: the
    /// request is dropped and denied, since nothing is left to act on
    /// an approval for a turn that no longer exists.
    pub async fn wait(&self, id: &str, rx: oneshot::Receiver<ApprovalDecision>, cancel: &CancelToken) -> ApprovalDecision {
        let ttl = self
            .pending
            .read()
            .get(id)
            .map(|p| {
                let remaining = p.request.expires_at - Utc::now();
                remaining.to_std().unwrap_or(Duration::ZERO)
            })
            .unwrap_or(self.default_ttl);

        tokio::select! {
            result = tokio::time::timeout(ttl, rx) => match result {
                Ok(Ok(decision)) => decision,
                Ok(Err(_)) | Err(_) => {
                    self.pending.write().remove(id);
                    ApprovalDecision::Denied
                }
            },
            _ = cancel.cancelled() => {
                self.pending.write().remove(id);
                ApprovalDecision::Denied
            }
        }
    }

    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        self.pending.read().values().map(|p| p.request.clone()).collect()
    }

    /// Deny and remove every pending request whose TTL has elapsed.
    /// Returns the ids swept.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let expired_ids: Vec<String> = self
            .pending
            .read()
            .values()
            .filter(|p| p.request.is_expired(now))
            .map(|p| p.request.id.clone())
            .collect();
        for id in &expired_ids {
            self.resolve(id, ApprovalDecision::Denied);
        }
        expired_ids
    }

    /// Spawn a background task that periodically sweeps expired approvals.
    /// Returns a handle the caller can abort on shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let swept = self.sweep_expired();
                if !swept.is_empty() {
                    tracing::debug!(count = swept.len(), "swept expired approvals");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call() -> ToolCall {
        ToolCall { call_id: "c1".into(), tool_name: "exec".into(), arguments: json!({ "command": "rm x" }) }
    }

    #[tokio::test]
    async fn approve_resolves_wait() {
        let broker = ApprovalBroker::new(Duration::from_secs(60));
        let (req, rx) = broker.create("s1", call(), "dangerous", None);
        let id = req.id.clone();
        let broker = Arc::new(broker);
        let waiter = tokio::spawn({
            let broker = broker.clone();
            async move { broker.wait(&id, rx, &CancelToken::new()).await }
        });
        assert!(broker.resolve(&req.id, ApprovalDecision::Approved));
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn deny_resolves_wait() {
        let broker = ApprovalBroker::new(Duration::from_secs(60));
        let (req, rx) = broker.create("s1", call(), "dangerous", None);
        broker.resolve(&req.id, ApprovalDecision::Denied);
        assert_eq!(broker.wait(&req.id, rx, &CancelToken::new()).await, ApprovalDecision::Denied);
    }

    #[tokio::test]
    async fn wait_times_out_as_denied() {
        let broker = ApprovalBroker::new(Duration::from_millis(10));
        let (req, rx) = broker.create("s1", call(), "dangerous", Some(Duration::from_millis(10)));
        let decision = broker.wait(&req.id, rx, &CancelToken::new()).await;
        assert_eq!(decision, ApprovalDecision::Denied);
        assert!(broker.list_pending().is_empty());
    }

    #[tokio::test]
    async fn cancel_interrupts_wait() {
        let broker = ApprovalBroker::new(Duration::from_secs(60));
        let (req, rx) = broker.create("s1", call(), "dangerous", None);
        let cancel = CancelToken::new();
        let broker = Arc::new(broker);
        let waiter = tokio::spawn({
            let broker = broker.clone();
            let cancel = cancel.clone();
            async move { broker.wait(&req.id, rx, &cancel).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Denied);
        assert!(broker.list_pending().is_empty());
    }

    #[test]
    fn sweep_expired_removes_stale_requests() {
        let broker = ApprovalBroker::new(Duration::from_millis(1));
        let (_req, _rx) = broker.create("s1", call(), "dangerous", Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        let swept = broker.sweep_expired();
        assert_eq!(swept.len(), 1);
        assert!(broker.list_pending().is_empty());
    }

    #[test]
    fn resolve_nonexistent_returns_false() {
        let broker = ApprovalBroker::new(Duration::from_secs(60));
        assert!(!broker.resolve("ghost", ApprovalDecision::Approved));
    }
}
