//! ConfidenceRouter - maps a confidence score to a dialogue zone

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Below this the planner's intent is too unclear to act on
pub const DEFAULT_ASK_BELOW: f64 = 0.5;

/// At or above this the plan is trusted outright
pub const DEFAULT_PROCEED_AT: f64 = 0.9;

/// How much user involvement a plan needs before running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Ask clarifying questions first
    Ask,
    /// Proceed, but announce the assumptions and allow a correction window
    AssumeAnnounce,
    /// Proceed straight to approval
    Proceed,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ask => "ask",
            Self::AssumeAnnounce => "assume_announce",
            Self::Proceed => "proceed",
        };
        write!(f, "{}", name)
    }
}

/// Routes a scalar confidence into one of three zones
///
/// Each zone is closed on its lower edge: `ask_below` itself is
/// assume-announce and `proceed_at` itself is proceed. Out-of-range input
/// falls into the nearest zone and NaN asks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceRouter {
    ask_below: f64,
    proceed_at: f64,
}

impl Default for ConfidenceRouter {
    fn default() -> Self {
        Self {
            ask_below: DEFAULT_ASK_BELOW,
            proceed_at: DEFAULT_PROCEED_AT,
        }
    }
}

impl ConfidenceRouter {
    /// Router with custom boundaries; `proceed_at` is raised to `ask_below` if lower
    pub fn new(ask_below: f64, proceed_at: f64) -> Self {
        debug!(ask_below, proceed_at, "ConfidenceRouter::new: called");
        Self {
            ask_below,
            proceed_at: proceed_at.max(ask_below),
        }
    }

    pub fn ask_below(&self) -> f64 {
        self.ask_below
    }

    pub fn proceed_at(&self) -> f64 {
        self.proceed_at
    }

    pub fn zone_of(&self, overall: f64) -> Zone {
        // Written so NaN fails the first comparison and lands in Ask
        let zone = if !(overall >= self.ask_below) {
            Zone::Ask
        } else if overall < self.proceed_at {
            Zone::AssumeAnnounce
        } else {
            Zone::Proceed
        };
        debug!(overall, %zone, "zone_of: routed");
        zone
    }

    pub fn should_ask(&self, overall: f64) -> bool {
        self.zone_of(overall) == Zone::Ask
    }

    pub fn should_assume_announce(&self, overall: f64) -> bool {
        self.zone_of(overall) == Zone::AssumeAnnounce
    }

    pub fn should_proceed(&self, overall: f64) -> bool {
        self.zone_of(overall) == Zone::Proceed
    }
}

/// Zone under the default 0.5 / 0.9 boundaries
pub fn zone_of(overall: f64) -> Zone {
    ConfidenceRouter::default().zone_of(overall)
}
