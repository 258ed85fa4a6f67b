//! Driver error types

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::dialogue::DialogueError;
use crate::domain::SessionKey;
use crate::events::PromptKind;
use crate::state::StoreError;

/// Errors from driving sessions
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Session {0} is already running")]
    AlreadyRunning(SessionKey),

    #[error("Session {0} is not running")]
    NotRunning(SessionKey),

    #[error("Session {0} has no pending prompt")]
    NoPendingPrompt(SessionKey),

    #[error("Expected a {expected} response, got {got}")]
    UnexpectedResponse { expected: PromptKind, got: PromptKind },

    #[error(transparent)]
    Dialogue(#[from] DialogueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type DriverResult<T> = Result<T, DriverError>;
