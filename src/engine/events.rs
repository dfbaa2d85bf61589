// Orchestra Engine — Progress Streams
//
// Two asynchronous streams reach the UI collaborator (spec.md §3, §5):
//   - step updates: coarse lifecycle events, buffered but blocking on send
//     so the UI never silently misses a "done"/"failed" transition.
//   - agent events: fine-grained behavioural events, non-blocking with
//     drop-oldest semantics under backpressure — a `broadcast` channel gives
//     us that for free via its lagging-receiver behaviour.
//
// Both sinks enforce spec.md §4.4's event-streaming invariant: no event or
// step update whose visible text would expose the string ".orchestra/" may
// reach these channels, since internal plan persistence is private to the
// core.

use tokio::sync::{broadcast, mpsc};

use super::types::{AgentEvent, StepUpdate};

const INTERNAL_MARKER: &str = ".orchestra/";

fn step_update_is_internal(update: &StepUpdate) -> bool {
    update.message.contains(INTERNAL_MARKER)
        || update.plan_yaml.as_deref().map(|y| y.contains(INTERNAL_MARKER)).unwrap_or(false)
}

fn agent_event_is_internal(event: &AgentEvent) -> bool {
    event.detail.contains(INTERNAL_MARKER) || event.payload.to_string().contains(INTERNAL_MARKER)
}

/// Redact the plan-id from text destined for an external channel when the
/// plan-id itself would otherwise only appear alongside a path — the id is
/// still useful to the UI, only the filesystem location is private.
fn scrub_internal_paths(text: &str) -> String {
    text.replace(INTERNAL_MARKER, "")
}

/// Recursively scrub every string value reachable from a payload — object
/// values and array elements included — not just a top-level string, since
/// `dispatch_event()` always builds an object payload (`{"path": ...}`).
fn scrub_payload(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(scrub_internal_paths(&s)),
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(scrub_payload).collect()),
        serde_json::Value::Object(map) => serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, scrub_payload(v))).collect()),
        other => other,
    }
}

#[derive(Clone)]
pub struct EventSinks {
    step_updates: mpsc::Sender<StepUpdate>,
    agent_events: broadcast::Sender<AgentEvent>,
}

impl EventSinks {
    pub fn new(step_buffer: usize, agent_buffer: usize) -> (Self, mpsc::Receiver<StepUpdate>, broadcast::Receiver<AgentEvent>) {
        let (step_tx, step_rx) = mpsc::channel(step_buffer);
        let (agent_tx, agent_rx) = broadcast::channel(agent_buffer);
        (EventSinks { step_updates: step_tx, agent_events: agent_tx }, step_rx, agent_rx)
    }

    /// Step updates block on send (spec.md §5): the orchestrator must not
    /// race ahead of a UI that hasn't drained "done"/"failed" yet.
    pub async fn step(&self, mut update: StepUpdate) {
        if step_update_is_internal(&update) {
            update.message = scrub_internal_paths(&update.message);
            update.plan_yaml = update.plan_yaml.map(|y| scrub_internal_paths(&y));
        }
        let _ = self.step_updates.send(update).await;
    }

    /// Agent events are best-effort: a full buffer drops the oldest
    /// unconsumed event via the broadcast channel's lagging semantics rather
    /// than blocking the run.
    pub fn agent(&self, mut event: AgentEvent) {
        if agent_event_is_internal(&event) {
            event.detail = scrub_internal_paths(&event.detail);
            event.payload = scrub_payload(event.payload);
        }
        let _ = self.agent_events.send(event);
    }

    pub fn subscribe_agent_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.agent_events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{AgentEventType, StepStatus};

    #[tokio::test]
    async fn step_update_scrubs_internal_marker() {
        let (sinks, mut rx, _agent_rx) = EventSinks::new(8, 8);
        sinks
            .step(StepUpdate {
                step_id: "t1".into(),
                status: StepStatus::Done,
                message: "wrote .orchestra/plans/x.md".into(),
                plan_id: Some("x".into()),
                plan_yaml: None,
            })
            .await;
        let received = rx.recv().await.unwrap();
        assert!(!received.message.contains(".orchestra/"));
    }

    #[test]
    fn agent_event_scrubs_internal_marker() {
        let (sinks, _step_rx, mut agent_rx) = EventSinks::new(8, 8);
        sinks.agent(AgentEvent::new(AgentEventType::Writing, None, "writing .orchestra/plans/x.md"));
        let received = agent_rx.try_recv().unwrap();
        assert!(!received.detail.contains(".orchestra/"));
    }

    #[test]
    fn agent_event_scrubs_internal_marker_inside_object_payload() {
        let (sinks, _step_rx, mut agent_rx) = EventSinks::new(8, 8);
        sinks.agent(
            AgentEvent::new(AgentEventType::Writing, None, "writing plan")
                .with_payload(serde_json::json!({ "path": ".orchestra/plans/x.md" })),
        );
        let received = agent_rx.try_recv().unwrap();
        assert!(!received.payload.to_string().contains(".orchestra/"));
    }
}
