//! SessionStore - actor that owns the persistent Store
//!
//! Processes commands via channels for thread-safe access to session state.
//! Nothing is cached between commands: every load reads the database and
//! every save writes it, so a restarted process sees exactly what the last
//! completed save left behind.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{SessionDefaults, SessionKey, SessionPatch, SessionState, Status, Store};

use super::messages::{StoreCommand, StoreError, StoreResponse};

/// Handle to send commands to the SessionStore actor
#[derive(Clone)]
pub struct SessionStore {
    tx: mpsc::Sender<StoreCommand>,
    defaults: SessionDefaults,
}

impl SessionStore {
    /// Spawn a store actor persisting under `store_path`
    pub fn spawn(store_path: impl AsRef<Path>, defaults: SessionDefaults) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let store = Store::open(store_path.as_ref())?;
        Ok(Self::spawn_with(store, defaults))
    }

    /// Spawn a store actor over a throwaway in-memory database
    pub fn in_memory(defaults: SessionDefaults) -> eyre::Result<Self> {
        debug!("in_memory: called");
        let store = Store::open_in_memory()?;
        Ok(Self::spawn_with(store, defaults))
    }

    fn spawn_with(store: Store, defaults: SessionDefaults) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx, defaults));
        info!("SessionStore spawned");
        Self { tx, defaults }
    }

    /// Limits stamped into fresh sessions
    pub fn defaults(&self) -> SessionDefaults {
        self.defaults
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StoreResponse<T>>) -> StoreCommand,
    ) -> StoreResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Load a session, or a fresh idle one if the key was never saved
    pub async fn load(&self, key: &SessionKey) -> StoreResponse<SessionState> {
        debug!(%key, "load: called");
        let key = key.clone();
        self.request(|reply| StoreCommand::Load { key, reply }).await
    }

    /// Persist a session under its key
    pub async fn save(&self, state: &SessionState, key: &SessionKey) -> StoreResponse<()> {
        debug!(%key, status = %state.status, "save: called");
        let key = key.clone();
        let state = Box::new(state.clone());
        self.request(|reply| StoreCommand::Save { key, state, reply }).await
    }

    /// Load, shallow-merge `patch`, save and return the merged state
    pub async fn update(&self, patch: SessionPatch, key: &SessionKey) -> StoreResponse<SessionState> {
        debug!(%key, status = ?patch.status, "update: called");
        let key = key.clone();
        let patch = Box::new(patch);
        self.request(|reply| StoreCommand::Update { key, patch, reply }).await
    }

    /// Overwrite the session with a fresh idle state
    pub async fn reset(&self, key: &SessionKey) -> StoreResponse<()> {
        debug!(%key, "reset: called");
        let key = key.clone();
        self.request(|reply| StoreCommand::Reset { key, reply }).await
    }

    /// Delete the session record entirely
    pub async fn clear(&self, key: &SessionKey) -> StoreResponse<bool> {
        debug!(%key, "clear: called");
        let key = key.clone();
        self.request(|reply| StoreCommand::Clear { key, reply }).await
    }

    /// Every stored session with its status
    pub async fn list(&self) -> StoreResponse<Vec<(SessionKey, Status)>> {
        debug!("list: called");
        self.request(|reply| StoreCommand::List { reply }).await
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        debug!("shutdown: called");
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelError)
    }
}

fn load_or_fresh(store: &Store, key: &SessionKey, defaults: &SessionDefaults) -> StoreResponse<SessionState> {
    match store.get::<SessionState>(key.as_str()) {
        Ok(Some(state)) => Ok(state),
        Ok(None) => {
            debug!(%key, "load_or_fresh: no stored session, using fresh state");
            Ok(SessionState::new(defaults))
        }
        Err(e) => Err(StoreError::DeserializationError(format!("{:#}", e))),
    }
}

/// The actor loop that owns the Store and processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StoreCommand>, defaults: SessionDefaults) {
    debug!("SessionStore actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Load { key, reply } => {
                debug!(%key, "actor_loop: Load command");
                let _ = reply.send(load_or_fresh(&store, &key, &defaults));
            }

            StoreCommand::Save { key, state, reply } => {
                debug!(%key, status = %state.status, "actor_loop: Save command");
                let result = store
                    .put(key.as_str(), state.as_ref())
                    .map_err(|e| StoreError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StoreCommand::Update { key, patch, reply } => {
                debug!(%key, "actor_loop: Update command");
                let result = load_or_fresh(&store, &key, &defaults).and_then(|mut state| {
                    patch.apply(&mut state);
                    store
                        .put(key.as_str(), &state)
                        .map_err(|e| StoreError::StoreError(e.to_string()))?;
                    Ok(state)
                });
                let _ = reply.send(result);
            }

            StoreCommand::Reset { key, reply } => {
                debug!(%key, "actor_loop: Reset command");
                let result = store
                    .put(key.as_str(), &SessionState::new(&defaults))
                    .map_err(|e| StoreError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StoreCommand::Clear { key, reply } => {
                debug!(%key, "actor_loop: Clear command");
                let result = store
                    .delete::<SessionState>(key.as_str())
                    .map_err(|e| StoreError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StoreCommand::List { reply } => {
                debug!("actor_loop: List command");
                let result = store
                    .list::<SessionState>()
                    .map(|rows| {
                        rows.into_iter()
                            .map(|(key, state)| (SessionKey::new(key), state.status))
                            .collect()
                    })
                    .map_err(|e| StoreError::StoreError(e.to_string()));
                let _ = reply.send(result);
            }

            StoreCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("SessionStore shutting down");
                break;
            }
        }
    }

    debug!("SessionStore actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageType, Role};
    use tempfile::tempdir;

    fn key(k: &str) -> SessionKey {
        SessionKey::from(k)
    }

    #[tokio::test]
    async fn test_load_missing_returns_fresh_state() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        let state = store.load(&key("nope")).await.unwrap();
        assert_eq!(state, SessionState::default());
        // Loading never creates a record
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_state_uses_store_defaults() {
        let defaults = SessionDefaults {
            max_clarification_rounds: 1,
            max_refine_iterations: 2,
            auto_execute_delay_ms: 50,
            max_iterations: 9,
        };
        let store = SessionStore::in_memory(defaults).unwrap();
        let state = store.load(&key("k")).await.unwrap();
        assert_eq!(state.defaults(), defaults);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        let mut state = SessionState::default();
        state.status = Status::Planning;
        state.current_task = Some("fill form".to_string());
        state.push_message(Role::User, MessageType::Task, "fill form", None);
        store.save(&state, &key("tab-1")).await.unwrap();

        let loaded = store.load(&key("tab-1")).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_update_merges_and_returns() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        let mut state = SessionState::default();
        state.current_task = Some("task".to_string());
        store.save(&state, &key("k")).await.unwrap();

        let merged = store
            .update(SessionPatch::status(Status::Executing), &key("k"))
            .await
            .unwrap();
        assert_eq!(merged.status, Status::Executing);
        assert_eq!(merged.current_task.as_deref(), Some("task"));

        let loaded = store.load(&key("k")).await.unwrap();
        assert_eq!(loaded, merged);
    }

    #[tokio::test]
    async fn test_update_on_missing_key_creates_record() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        store
            .update(SessionPatch::status(Status::Planning), &key("new"))
            .await
            .unwrap();
        let sessions = store.list().await.unwrap();
        assert_eq!(sessions, vec![(key("new"), Status::Planning)]);
    }

    #[tokio::test]
    async fn test_reset_returns_to_default() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        let mut state = SessionState::default();
        state.status = Status::Error;
        state.last_error = Some("boom".to_string());
        store.save(&state, &key("k")).await.unwrap();

        store.reset(&key("k")).await.unwrap();
        assert_eq!(store.load(&key("k")).await.unwrap(), SessionState::default());
    }

    #[tokio::test]
    async fn test_clear_deletes() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        store.save(&SessionState::default(), &key("k")).await.unwrap();
        assert!(store.clear(&key("k")).await.unwrap());
        assert!(!store.clear(&key("k")).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let temp = tempdir().unwrap();
        {
            let store = SessionStore::spawn(temp.path(), SessionDefaults::default()).unwrap();
            let mut state = SessionState::default();
            state.status = Status::MidExecDialog;
            state.execution_state.current_step_index = 2;
            store.save(&state, &key("tab-9")).await.unwrap();
            store.shutdown().await.unwrap();
        }

        let store = SessionStore::spawn(temp.path(), SessionDefaults::default()).unwrap();
        let state = store.load(&key("tab-9")).await.unwrap();
        assert_eq!(state.status, Status::MidExecDialog);
        assert_eq!(state.execution_state.current_step_index, 2);
    }

    #[tokio::test]
    async fn test_after_shutdown_requests_fail() {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        store.shutdown().await.unwrap();
        // Give the actor a moment to exit
        tokio::task::yield_now().await;
        let result = store.load(&key("k")).await;
        assert!(matches!(result, Err(StoreError::ChannelError)));
    }
}
