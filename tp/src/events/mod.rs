//! Dialogue event bus
//!
//! Every observable step of a session is a [`DialogueEvent`] broadcast on
//! the [`EventBus`]. Presenters render them, the [`EventLogger`] writes
//! them to per-session JSONL files, and tests assert on them.
//!
//! ```rust,ignore
//! let bus = Arc::new(EventBus::with_default_capacity());
//! let emitter = bus.emitter_for(&SessionKey::from("tab-7"));
//! emitter.progress(Status::Planning, "Planning");
//!
//! let mut rx = bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {}", event.session(), event.event_type());
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EventLogger, read_session_events, spawn_event_logger};
pub use types::{DialogueEvent, EventLogEntry, PromptCloseReason, PromptKind};
