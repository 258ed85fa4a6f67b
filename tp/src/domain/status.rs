//! Session status and mid-execution decisions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The eleven states of the dialogue state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No task in flight
    #[default]
    Idle,
    /// Waiting on the planner for a plan
    Planning,
    /// Waiting on the user to answer clarifying questions
    Clarifying,
    /// Announced assumptions, waiting out the correction window
    AssumeAnnounce,
    /// Self-refine loop running over the current plan
    Refining,
    /// Plan ready, waiting on user sign-off
    AwaitingApproval,
    /// Walking the plan's steps
    Executing,
    /// A step failed, waiting on retry/skip/replan/abort
    MidExecDialog,
    /// User asked for a new plan after a failure
    Replanning,
    /// All steps done
    Completed,
    /// Unrecoverable failure
    Error,
}

impl Status {
    /// Every valid status, in lifecycle order
    pub const ALL: [Status; 11] = [
        Status::Idle,
        Status::Planning,
        Status::Clarifying,
        Status::AssumeAnnounce,
        Status::Refining,
        Status::AwaitingApproval,
        Status::Executing,
        Status::MidExecDialog,
        Status::Replanning,
        Status::Completed,
        Status::Error,
    ];

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Clarifying => "clarifying",
            Self::AssumeAnnounce => "assume_announce",
            Self::Refining => "refining",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::MidExecDialog => "mid_exec_dialog",
            Self::Replanning => "replanning",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for a status name outside the fixed enumeration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for Status {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "Status::from_str: called");
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| InvalidStatus(s.to_string()))
    }
}

/// The user's answer to a mid-execution failure dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidExecDecision {
    /// Attempt the same step again
    Retry,
    /// Move past the failed step
    Skip,
    /// Ask the planner for a new plan
    Replan,
    /// Give up on the task
    Abort,
}

impl MidExecDecision {
    /// Status the session moves to once this decision is recorded
    pub fn next_status(&self) -> Status {
        match self {
            Self::Retry | Self::Skip => Status::Executing,
            Self::Replan => Status::Replanning,
            Self::Abort => Status::Idle,
        }
    }
}

impl fmt::Display for MidExecDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Replan => "replan",
            Self::Abort => "abort",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MidExecDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" | "r" => Ok(Self::Retry),
            "skip" | "s" => Ok(Self::Skip),
            "replan" | "p" => Ok(Self::Replan),
            "abort" | "a" => Ok(Self::Abort),
            other => Err(format!("Unknown decision '{}': expected retry, skip, replan or abort", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_round_trip() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
    }

    #[test]
    fn test_serde_name_matches_as_str() {
        for status in Status::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        for name in ["", "running", "IDLE", "assume-announce", "done"] {
            assert_eq!(name.parse::<Status>(), Err(InvalidStatus(name.to_string())));
        }
    }

    #[test]
    fn test_decision_next_status() {
        assert_eq!(MidExecDecision::Retry.next_status(), Status::Executing);
        assert_eq!(MidExecDecision::Skip.next_status(), Status::Executing);
        assert_eq!(MidExecDecision::Replan.next_status(), Status::Replanning);
        assert_eq!(MidExecDecision::Abort.next_status(), Status::Idle);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!("Retry".parse::<MidExecDecision>(), Ok(MidExecDecision::Retry));
        assert_eq!(" s ".parse::<MidExecDecision>(), Ok(MidExecDecision::Skip));
        assert!("later".parse::<MidExecDecision>().is_err());
    }
}
