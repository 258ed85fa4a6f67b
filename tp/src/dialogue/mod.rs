//! Dialogue state machine
//!
//! - [`DialogueController`] owns every persisted transition
//! - [`ConfidenceRouter`] maps plan confidence to ask / assume-announce / proceed
//! - [`SelfRefineLoop`] improves confident plans before approval

mod controller;
mod error;
mod refine;
mod router;

pub use controller::{DialogueController, DialogueResult};
pub use error::DialogueError;
pub use refine::{DEFAULT_GOOD_ENOUGH, RefineOutcome, SelfRefineLoop, derive_feedback};
pub use router::{ConfidenceRouter, DEFAULT_ASK_BELOW, DEFAULT_PROCEED_AT, Zone, zone_of};
