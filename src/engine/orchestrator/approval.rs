// Orchestra Engine — Plan approval gate (spec.md §4.4 "Approval gate", §5)

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::types::PlanApproval;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Capacity-1 rendezvous channel: a late `submit` overwrites any undelivered
/// decision rather than queuing (spec.md §5 "approval channel capacity 1,
/// overwritten on contention").
pub struct ApprovalChannel {
    slot: Mutex<Option<PlanApproval>>,
    notify: Notify,
}

impl ApprovalChannel {
    pub fn new() -> Self {
        ApprovalChannel { slot: Mutex::new(None), notify: Notify::new() }
    }

    /// Non-blocking; replaces any pending decision.
    pub fn submit(&self, decision: PlanApproval) {
        *self.slot.lock() = Some(decision);
        self.notify.notify_waiters();
    }

    /// Block until a decision for `plan_id` arrives. A decision carrying a
    /// different plan id is dropped silently (spec.md §4.4 "A decision whose
    /// plan-id does not match is ignored") and the wait continues.
    pub async fn await_decision(&self, plan_id: &str, cancelled: &AtomicBool) -> OrchestraResult<PlanApproval> {
        loop {
            if cancelled.load(Ordering::SeqCst) {
                return Err(OrchestraError::Cancelled);
            }
            if let Some(decision) = self.slot.lock().take() {
                if decision.plan_id == plan_id {
                    return Ok(decision);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

impl Default for ApprovalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn ignores_mismatched_plan_id_then_accepts_match() {
        let channel = Arc::new(ApprovalChannel::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let waiter = {
            let channel = channel.clone();
            let cancelled = cancelled.clone();
            tokio::spawn(async move { channel.await_decision("p2", &cancelled).await })
        };

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        channel.submit(PlanApproval { plan_id: "p1".into(), approved: true, edited_plan: None });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        channel.submit(PlanApproval { plan_id: "p2".into(), approved: true, edited_plan: None });

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision.plan_id, "p2");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_wait() {
        let channel = ApprovalChannel::new();
        let cancelled = AtomicBool::new(true);
        let err = channel.await_decision("p1", &cancelled).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn late_submit_overwrites_pending_decision() {
        let channel = ApprovalChannel::new();
        channel.submit(PlanApproval { plan_id: "stale".into(), approved: false, edited_plan: None });
        channel.submit(PlanApproval { plan_id: "fresh".into(), approved: true, edited_plan: None });
        let cancelled = AtomicBool::new(false);
        let decision = channel.await_decision("fresh", &cancelled).await.unwrap();
        assert!(decision.approved);
    }
}
