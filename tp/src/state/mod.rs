//! Session persistence with actor pattern
//!
//! SessionStore owns the sessionstore Store and processes messages via
//! channels, providing thread-safe access to persistent session state. It is
//! the only component that touches persistence.

mod manager;
mod messages;

pub use manager::SessionStore;
pub use messages::{StoreCommand, StoreError, StoreResponse};
