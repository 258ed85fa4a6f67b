//! Session orchestration
//!
//! [`OrchestrationDriver`] owns the running sessions. Human input reaches a
//! session only through [`OrchestrationDriver::respond`], matched against
//! the one prompt the session is waiting on.

mod error;
mod orchestrator;
mod registry;
mod response;

pub use error::{DriverError, DriverResult};
pub use orchestrator::{DEFAULT_MID_EXEC_TIMEOUT_MS, DriverConfig, OrchestrationDriver, RunOutcome};
pub use registry::{PendingPrompt, SessionRegistry};
pub use response::HumanResponse;
