//! Domain types for TaskPilot
//!
//! Core domain types: SessionState and the plan / page payloads exchanged
//! with the planner and executor. SessionState implements the Record trait
//! for SessionStore persistence.

mod key;
mod page;
mod plan;
mod session;
mod status;

pub use key::SessionKey;
pub use page::{Action, ActionResult, ElementContext, PageElement, PageState};
pub use plan::{Assumption, ClarifyingQuestion, Confidence, NO_TARGET_ACTIONS, Plan, PlanStep, QuestionOption};
pub use session::{
    Checkpoint, CompletedStep, ConversationEntry, DEFAULT_AUTO_EXECUTE_DELAY_MS, DEFAULT_MAX_CLARIFICATION_ROUNDS,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_REFINE_ITERATIONS, DialogueState, ExecutionState, FailedStep, MessageType,
    Role, SessionDefaults, SessionPatch, SessionState,
};
pub use status::{InvalidStatus, MidExecDecision, Status};

// Re-export sessionstore types for convenience
pub use sessionstore::{Record, Store, now_ms};
