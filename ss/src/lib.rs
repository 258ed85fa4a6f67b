//! SessionStore - keyed JSON record persistence
//!
//! A small persistence layer for state that must survive process restarts.
//! Every record lives in a named collection under a caller-chosen key and is
//! stored as one JSON document in SQLite.
//!
//! # Layout
//!
//! ```text
//! {store_dir}/
//! └── sessions.db      # records(collection, key, body, updated_at)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sessionstore::{Record, Store};
//!
//! let mut store = Store::open(".taskpilot")?;
//! store.put("tab-42", &my_record)?;
//! let loaded: Option<MyRecord> = store.get("tab-42")?;
//! ```

mod store;

pub use store::{DB_FILE_NAME, Record, Store, now_ms};
