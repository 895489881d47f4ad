//! Approval gate — a single-slot queue for user decisions.
//!
//! At most one request is outstanding. The requester holds the receiving
//! half of a oneshot channel; `approve`/`reject`/`abort` take the sender
//! out of the slot, so every request is resolved at most once and an
//! abort never leaves a waiter suspended.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use codehelm_core::config::AutoApproveConfig;
use codehelm_core::error::ApprovalError;
use codehelm_core::run::ApprovalType;

enum ApprovalSlot {
    NoRequest,
    AwaitingDecision {
        tool_call_id: String,
        resolver: oneshot::Sender<bool>,
    },
}

/// The gate shared between a running loop and whoever answers prompts.
pub struct ApprovalGate {
    slot: Mutex<ApprovalSlot>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(ApprovalSlot::NoRequest),
        }
    }

    fn slot(&self) -> MutexGuard<'_, ApprovalSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a request for `tool_call_id`.
    ///
    /// Fails if another request is already outstanding.
    pub fn request(&self, tool_call_id: &str) -> Result<oneshot::Receiver<bool>, ApprovalError> {
        let mut slot = self.slot();
        if let ApprovalSlot::AwaitingDecision { tool_call_id: pending, .. } = &*slot {
            return Err(ApprovalError::SlotOccupied {
                pending: pending.clone(),
            });
        }
        let (tx, rx) = oneshot::channel();
        *slot = ApprovalSlot::AwaitingDecision {
            tool_call_id: tool_call_id.to_string(),
            resolver: tx,
        };
        info!(tool_call_id = tool_call_id, "approval requested");
        Ok(rx)
    }

    /// Suspend on a receiver from [`request`](Self::request).
    ///
    /// Cancellation and a dropped resolver both count as a rejection.
    pub async fn await_decision(&self, rx: oneshot::Receiver<bool>, cancel: &CancellationToken) -> bool {
        tokio::select! {
            decision = rx => decision.unwrap_or(false),
            _ = cancel.cancelled() => {
                self.abort();
                false
            }
        }
    }

    /// Id of the call awaiting a decision, if any.
    pub fn pending(&self) -> Option<String> {
        match &*self.slot() {
            ApprovalSlot::NoRequest => None,
            ApprovalSlot::AwaitingDecision { tool_call_id, .. } => Some(tool_call_id.clone()),
        }
    }

    /// Resolve the outstanding request. A no-op returning `None` when
    /// nothing is pending.
    pub fn resolve(&self, approved: bool) -> Option<String> {
        let taken = std::mem::replace(&mut *self.slot(), ApprovalSlot::NoRequest);
        match taken {
            ApprovalSlot::NoRequest => {
                debug!(approved, "no approval outstanding; ignoring decision");
                None
            }
            ApprovalSlot::AwaitingDecision {
                tool_call_id,
                resolver,
            } => {
                info!(tool_call_id = %tool_call_id, approved, "approval resolved");
                // The waiter may already be gone (cancelled); that is fine.
                let _ = resolver.send(approved);
                Some(tool_call_id)
            }
        }
    }

    pub fn approve(&self) -> Option<String> {
        self.resolve(true)
    }

    pub fn reject(&self) -> Option<String> {
        self.resolve(false)
    }

    /// Reject and discard any outstanding request.
    pub fn abort(&self) -> Option<String> {
        self.resolve(false)
    }
}

// ─────────────────────────────────────────────
// Auto-approval
// ─────────────────────────────────────────────

/// Whether a call with this approval type must stop at the gate.
pub fn requires_prompt(approval: ApprovalType, auto: &AutoApproveConfig) -> bool {
    match approval {
        ApprovalType::None => false,
        ApprovalType::Edits => !auto.edits,
        ApprovalType::Terminal => !auto.terminal,
        ApprovalType::Dangerous => !auto.dangerous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_approve_resolves_waiter() {
        let gate = ApprovalGate::new();
        let rx = gate.request("call_1").unwrap();
        assert_eq!(gate.pending().as_deref(), Some("call_1"));
        assert_eq!(gate.approve().as_deref(), Some("call_1"));
        assert!(rx.await.unwrap());
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_single_slot() {
        let gate = ApprovalGate::new();
        let _rx = gate.request("a").unwrap();
        assert_eq!(
            gate.request("b").unwrap_err(),
            ApprovalError::SlotOccupied { pending: "a".into() }
        );
    }

    #[test]
    fn test_reject_without_request_is_noop() {
        let gate = ApprovalGate::new();
        assert!(gate.reject().is_none());
        assert!(gate.approve().is_none());
        assert!(gate.pending().is_none());
    }

    #[tokio::test]
    async fn test_resolved_exactly_once() {
        let gate = ApprovalGate::new();
        let rx = gate.request("x").unwrap();
        assert!(gate.reject().is_some());
        assert!(gate.approve().is_none());
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_await_decision_resumes_on_approve() {
        let gate = Arc::new(ApprovalGate::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            let rx = gate.request("call_9").unwrap();
            tokio::spawn(async move { gate.await_decision(rx, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(gate.approve().as_deref(), Some("call_9"));
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_resolves_as_rejected() {
        let gate = Arc::new(ApprovalGate::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            let rx = gate.request("call_2").unwrap();
            tokio::spawn(async move { gate.await_decision(rx, &cancel).await })
        };
        cancel.cancel();
        assert!(!waiter.await.unwrap());
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_requires_prompt_per_category() {
        let auto = AutoApproveConfig {
            edits: true,
            terminal: false,
            dangerous: false,
        };
        assert!(!requires_prompt(ApprovalType::None, &auto));
        assert!(!requires_prompt(ApprovalType::Edits, &auto));
        assert!(requires_prompt(ApprovalType::Terminal, &auto));
        assert!(requires_prompt(ApprovalType::Dangerous, &AutoApproveConfig::default()));
        assert!(!requires_prompt(ApprovalType::Dangerous, &AutoApproveConfig::all()));
    }
}
