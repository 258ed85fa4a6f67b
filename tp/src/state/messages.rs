//! Session store messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{SessionKey, SessionPatch, SessionState, Status};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from store operations
pub type StoreResponse<T> = Result<T, StoreError>;

/// Commands sent to the SessionStore actor
#[derive(Debug)]
pub enum StoreCommand {
    Load {
        key: SessionKey,
        reply: oneshot::Sender<StoreResponse<SessionState>>,
    },
    Save {
        key: SessionKey,
        state: Box<SessionState>,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    Update {
        key: SessionKey,
        patch: Box<SessionPatch>,
        reply: oneshot::Sender<StoreResponse<SessionState>>,
    },
    Reset {
        key: SessionKey,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    Clear {
        key: SessionKey,
        reply: oneshot::Sender<StoreResponse<bool>>,
    },
    List {
        reply: oneshot::Sender<StoreResponse<Vec<(SessionKey, Status)>>>,
    },

    // Shutdown
    Shutdown,
}
