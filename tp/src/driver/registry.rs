//! SessionRegistry - bookkeeping for running sessions
//!
//! One entry per running session: its stop signal, the receiver that
//! resolves when the run task exits, and at most one pending prompt.

use std::collections::HashMap;

use tokio::sync::{Mutex, oneshot, watch};
use tracing::debug;

use super::error::{DriverError, DriverResult};
use super::response::HumanResponse;
use crate::domain::SessionKey;
use crate::events::PromptKind;

/// A human decision a session is blocked on
pub struct PendingPrompt {
    pub kind: PromptKind,
    reply: oneshot::Sender<HumanResponse>,
}

struct SessionEntry {
    run_id: u64,
    stop_tx: watch::Sender<bool>,
    done_rx: Option<oneshot::Receiver<()>>,
    pending: Option<PendingPrompt>,
    stopping: bool,
}

/// Handles given to a newly registered run
pub struct RunTicket {
    pub run_id: u64,
    pub stop_rx: watch::Receiver<bool>,
    pub done_tx: oneshot::Sender<()>,
}

/// What `begin_stop` took out of the entry
pub struct StopTicket {
    pub run_id: u64,
    pub done_rx: Option<oneshot::Receiver<()>>,
    pub closed_prompt: Option<PromptKind>,
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionKey, SessionEntry>>,
    next_run_id: Mutex<u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for a new run
    pub async fn register(&self, key: &SessionKey) -> DriverResult<RunTicket> {
        debug!(%key, "register: called");
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Err(DriverError::AlreadyRunning(key.clone()));
        }

        let run_id = {
            let mut next = self.next_run_id.lock().await;
            *next += 1;
            *next
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        entries.insert(
            key.clone(),
            SessionEntry {
                run_id,
                stop_tx,
                done_rx: Some(done_rx),
                pending: None,
                stopping: false,
            },
        );
        Ok(RunTicket {
            run_id,
            stop_rx,
            done_tx,
        })
    }

    /// Drop the entry of a run that exited on its own
    ///
    /// An entry being stopped is left for `finish_stop`.
    pub async fn finish(&self, key: &SessionKey, run_id: u64) {
        debug!(%key, run_id, "finish: called");
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.run_id == run_id && !e.stopping) {
            entries.remove(key);
        }
    }

    /// Signal stop and take what the caller needs to wait on
    pub async fn begin_stop(&self, key: &SessionKey) -> Option<StopTicket> {
        debug!(%key, "begin_stop: called");
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(key)?;
        entry.stopping = true;
        let _ = entry.stop_tx.send(true);
        Some(StopTicket {
            run_id: entry.run_id,
            done_rx: entry.done_rx.take(),
            closed_prompt: entry.pending.take().map(|p| p.kind),
        })
    }

    /// Release the entry once the stopped session has been reset
    pub async fn finish_stop(&self, key: &SessionKey, run_id: u64) {
        debug!(%key, run_id, "finish_stop: called");
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.run_id == run_id) {
            entries.remove(key);
        }
    }

    /// Open a prompt; the receiver resolves when `deliver` is called
    pub async fn open_prompt(
        &self,
        key: &SessionKey,
        kind: PromptKind,
    ) -> DriverResult<oneshot::Receiver<HumanResponse>> {
        debug!(%key, %kind, "open_prompt: called");
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(key)
            .filter(|e| !e.stopping)
            .ok_or_else(|| DriverError::NotRunning(key.clone()))?;
        let (reply, rx) = oneshot::channel();
        entry.pending = Some(PendingPrompt { kind, reply });
        Ok(rx)
    }

    /// Remove a prompt that closed without an answer
    pub async fn close_prompt(&self, key: &SessionKey, kind: PromptKind) -> bool {
        debug!(%key, %kind, "close_prompt: called");
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.pending.as_ref().is_some_and(|p| p.kind == kind) => {
                entry.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Hand `response` to the session's pending prompt
    ///
    /// A response of the wrong kind is rejected and the prompt stays open.
    pub async fn deliver(&self, key: &SessionKey, response: HumanResponse) -> DriverResult<()> {
        debug!(%key, kind = %response.kind(), "deliver: called");
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(key)
            .filter(|e| !e.stopping)
            .ok_or_else(|| DriverError::NotRunning(key.clone()))?;
        let expected = entry
            .pending
            .as_ref()
            .map(|p| p.kind)
            .ok_or_else(|| DriverError::NoPendingPrompt(key.clone()))?;
        if expected != response.kind() {
            return Err(DriverError::UnexpectedResponse {
                expected,
                got: response.kind(),
            });
        }
        if let Some(pending) = entry.pending.take() {
            // receiver gone means the prompt just timed out
            let _ = pending.reply.send(response);
        }
        Ok(())
    }

    pub async fn pending_kind(&self, key: &SessionKey) -> Option<PromptKind> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|e| e.pending.as_ref().map(|p| p.kind))
    }

    pub async fn is_running(&self, key: &SessionKey) -> bool {
        self.entries.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MidExecDecision;

    fn key(k: &str) -> SessionKey {
        SessionKey::from(k)
    }

    #[tokio::test]
    async fn test_register_once_per_key() {
        let registry = SessionRegistry::new();
        let ticket = registry.register(&key("a")).await.unwrap();
        assert!(matches!(
            registry.register(&key("a")).await,
            Err(DriverError::AlreadyRunning(_))
        ));
        registry.register(&key("b")).await.unwrap();
        assert!(registry.is_running(&key("a")).await);
        assert!(registry.is_running(&key("b")).await);

        registry.finish(&key("a"), ticket.run_id).await;
        assert!(!registry.is_running(&key("a")).await);
    }

    #[tokio::test]
    async fn test_deliver_checks_kind() {
        let registry = SessionRegistry::new();
        registry.register(&key("a")).await.unwrap();

        assert!(matches!(
            registry.deliver(&key("a"), HumanResponse::approve()).await,
            Err(DriverError::NoPendingPrompt(_))
        ));

        let rx = registry.open_prompt(&key("a"), PromptKind::Approval).await.unwrap();
        assert!(matches!(
            registry
                .deliver(&key("a"), HumanResponse::decide(MidExecDecision::Skip))
                .await,
            Err(DriverError::UnexpectedResponse {
                expected: PromptKind::Approval,
                got: PromptKind::MidExecDecision
            })
        ));
        assert_eq!(registry.pending_kind(&key("a")).await, Some(PromptKind::Approval));

        registry.deliver(&key("a"), HumanResponse::approve()).await.unwrap();
        assert_eq!(rx.await.unwrap(), HumanResponse::approve());
        assert_eq!(registry.pending_kind(&key("a")).await, None);
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.deliver(&key("zz"), HumanResponse::approve()).await,
            Err(DriverError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_signals_and_closes_prompt() {
        let registry = SessionRegistry::new();
        let mut ticket = registry.register(&key("a")).await.unwrap();
        let prompt_rx = registry.open_prompt(&key("a"), PromptKind::Clarification).await.unwrap();

        let stop = registry.begin_stop(&key("a")).await.unwrap();
        assert_eq!(stop.closed_prompt, Some(PromptKind::Clarification));
        ticket.stop_rx.changed().await.unwrap();
        assert!(*ticket.stop_rx.borrow());
        assert!(prompt_rx.await.is_err());

        // the run exiting must not release a key that is mid-stop
        registry.finish(&key("a"), ticket.run_id).await;
        assert!(registry.is_running(&key("a")).await);
        drop(ticket.done_tx);
        assert!(stop.done_rx.unwrap().await.is_err());

        registry.finish_stop(&key("a"), stop.run_id).await;
        assert!(!registry.is_running(&key("a")).await);
    }
}
