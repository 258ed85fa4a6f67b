//! Event Bus - central pub/sub for dialogue events
//!
//! Uses a tokio broadcast channel so any number of presenters and loggers
//! can watch every session at once.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{DialogueEvent, PromptCloseReason, PromptKind};
use crate::dialogue::Zone;
use crate::domain::{Action, Assumption, ClarifyingQuestion, Confidence, Plan, PlanStep, SessionKey, Status};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Central event bus for dialogue activity
pub struct EventBus {
    tx: broadcast::Sender<DialogueEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: DialogueEvent) {
        debug!(event_type = event.event_type(), session = %event.session(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DialogueEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one session
    pub fn emitter_for(&self, session: &SessionKey) -> EventEmitter {
        debug!(%session, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            session: session.clone(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap-to-clone handle that stamps every event with its session key
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<DialogueEvent>,
    session: SessionKey,
}

impl EventEmitter {
    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    /// Emit a raw event
    pub fn emit(&self, event: DialogueEvent) {
        debug!(event_type = event.event_type(), session = %self.session, "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn progress(&self, status: Status, message: impl Into<String>) {
        self.emit(DialogueEvent::Progress {
            session: self.session.clone(),
            status,
            message: message.into(),
        });
    }

    pub fn confidence_report(&self, confidence: Confidence, zone: Zone) {
        self.emit(DialogueEvent::ConfidenceReport {
            session: self.session.clone(),
            confidence,
            zone,
        });
    }

    pub fn self_refine_progress(&self, iteration: u32, max_iterations: u32, score: f64, improvements: Vec<String>) {
        self.emit(DialogueEvent::SelfRefineProgress {
            session: self.session.clone(),
            iteration,
            max_iterations,
            score,
            improvements,
        });
    }

    pub fn clarify_needed(&self, questions: Vec<ClarifyingQuestion>, round: u32, max_rounds: u32) {
        self.emit(DialogueEvent::ClarifyNeeded {
            session: self.session.clone(),
            questions,
            round,
            max_rounds,
        });
    }

    pub fn assume_announce(&self, assumptions: Vec<Assumption>, plan: Plan, auto_execute_delay_ms: u64) {
        self.emit(DialogueEvent::AssumeAnnounce {
            session: self.session.clone(),
            assumptions,
            plan,
            auto_execute_delay_ms,
        });
    }

    pub fn plan_ready(&self, plan: Plan, confidence: Confidence) {
        self.emit(DialogueEvent::PlanReady {
            session: self.session.clone(),
            plan,
            confidence,
        });
    }

    pub fn mid_exec_dialog(&self, step_index: usize, step: PlanStep, error: impl Into<String>, timeout_ms: u64) {
        self.emit(DialogueEvent::MidExecDialog {
            session: self.session.clone(),
            step_index,
            step,
            error: error.into(),
            timeout_ms,
        });
    }

    pub fn prompt_closed(&self, kind: PromptKind, reason: PromptCloseReason) {
        self.emit(DialogueEvent::PromptClosed {
            session: self.session.clone(),
            kind,
            reason,
        });
    }

    pub fn action_started(&self, step_index: usize, total_steps: usize, step: PlanStep) {
        self.emit(DialogueEvent::ActionStarted {
            session: self.session.clone(),
            step_index,
            total_steps,
            step,
        });
    }

    pub fn action(&self, step_index: usize, action: Action, success: bool, error: Option<String>) {
        self.emit(DialogueEvent::Action {
            session: self.session.clone(),
            step_index,
            action,
            success,
            error,
        });
    }

    pub fn complete(&self, result: impl Into<String>) {
        self.emit(DialogueEvent::Complete {
            session: self.session.clone(),
            result: result.into(),
        });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.emit(DialogueEvent::Error {
            session: self.session.clone(),
            error: error.into(),
        });
    }

    pub fn stopped(&self) {
        self.emit(DialogueEvent::Stopped {
            session: self.session.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(DialogueEvent::Stopped {
            session: SessionKey::from("tab-1"),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session().as_str(), "tab-1");
        assert_eq!(event.event_type(), "Stopped");
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(DialogueEvent::Stopped {
            session: SessionKey::from("tab-1"),
        });
    }

    #[tokio::test]
    async fn test_emitter_stamps_session() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for(&SessionKey::from(111u64));

        emitter.progress(Status::Planning, "Planning");
        emitter.confidence_report(Confidence::uniform(0.95), Zone::Proceed);
        emitter.plan_ready(Plan::new("p", vec![]), Confidence::uniform(0.95));
        emitter.complete("done");

        for expected in ["Progress", "ConfidenceReport", "PlanReady", "Complete"] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.session().as_str(), "111");
            assert_eq!(event.event_type(), expected);
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emitter_for(&SessionKey::from("s")).error("boom");

        assert_eq!(rx1.recv().await.unwrap().event_type(), "Error");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "Error");
    }
}
