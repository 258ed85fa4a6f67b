//! Dialogue error types

use thiserror::Error;

use crate::domain::InvalidStatus;
use crate::state::StoreError;

/// Errors from dialogue state transitions
#[derive(Debug, Error)]
pub enum DialogueError {
    /// Requested status is not one of the eleven valid states
    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatus),

    #[error("Session has no current plan")]
    NoPlan,

    #[error("Plan has no step {0}")]
    StepOutOfRange(usize),

    #[error("Session has no failed step awaiting a decision")]
    NoFailedStep,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
