//! Event Logger - persists dialogue events to JSONL files
//!
//! Subscribes to the EventBus and appends every event to
//! `{sessions_dir}/{session}/events.jsonl` for later inspection. Session
//! keys are percent-encoded into directory names.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{DialogueEvent, EventLogEntry};

const EVENTS_FILE: &str = "events.jsonl";

/// Event logger that writes events to per-session JSONL files
pub struct EventLogger {
    sessions_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(sessions_dir: impl AsRef<Path>) -> Self {
        let sessions_dir = sessions_dir.as_ref().to_path_buf();
        debug!(?sessions_dir, "EventLogger::new: creating logger");
        Self {
            sessions_dir,
            writers: HashMap::new(),
        }
    }

    /// Append an event to its session's log file
    pub fn write_event(&mut self, event: &DialogueEvent) -> eyre::Result<()> {
        let session = event.session().as_str().to_string();
        debug!(%session, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(&session) {
            let dir = self.sessions_dir.join(session_dir_name(&session));
            fs::create_dir_all(&dir)?;
            let log_path = dir.join(EVENTS_FILE);
            debug!(?log_path, "EventLogger: opening log file");
            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(session.clone(), BufWriter::new(file));
        }
        let writer = self
            .writers
            .get_mut(&session)
            .ok_or_else(|| eyre::eyre!("No writer for session {}", session))?;

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Drop the writer for a session whose run ended
    pub fn close_session(&mut self, session: &str) {
        debug!(%session, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session) {
            let _ = writer.flush();
        }
    }

    /// Consume events until every sender of the bus is gone
    pub async fn run(mut self, mut rx: broadcast::Receiver<DialogueEvent>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(session = %event.session(), error = %e, "EventLogger: failed to write event");
                    }
                    if event.is_terminal() {
                        self.close_session(event.session().as_str());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (session, mut writer) in self.writers.drain() {
            debug!(%session, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read back every logged event of one session
pub fn read_session_events(sessions_dir: impl AsRef<Path>, session: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = sessions_dir.as_ref().join(session_dir_name(session)).join(EVENTS_FILE);
    debug!(?log_path, "read_session_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_session_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_session_events: loaded entries");
    Ok(entries)
}

/// Directory name for a session's log
///
/// Bytes outside `[A-Za-z0-9_-]` are written as `%XX`, so no key can name
/// a parent directory or a path separator.
fn session_dir_name(session: &str) -> String {
    if session.is_empty() {
        return "%".to_string();
    }
    let mut name = String::with_capacity(session.len());
    for byte in session.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name
}

/// Spawn the event logger as a background task
///
/// Subscribes before returning, so no event emitted afterwards is missed.
pub fn spawn_event_logger(event_bus: Arc<EventBus>, sessions_dir: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(sessions_dir);
    let rx = event_bus.subscribe();
    tokio::spawn(logger.run(rx))
}
