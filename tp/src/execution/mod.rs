//! Plan execution
//!
//! [`ExecutionEngine`] runs the approved plan step by step, checkpointing
//! the page before each step and re-resolving targets that disappeared.

mod engine;
mod resolve;

pub use engine::{DEFAULT_STEP_DELAY_MS, DecisionSource, ExecutionEngine, ExecutionOutcome};
pub use resolve::{best_candidate, is_target_missing, score_element};
