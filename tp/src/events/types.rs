//! Event types for TaskPilot dialogue streaming
//!
//! Everything a presenter needs to render a session: progress, the four
//! kinds of human prompt, refine and confidence reports, per-step action
//! results and the terminal outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialogue::Zone;
use crate::domain::{Action, Assumption, ClarifyingQuestion, Confidence, Plan, PlanStep, SessionKey, Status};

/// Which human decision a prompt is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Free-text or option answer to clarifying questions
    Clarification,
    /// Correction or cancel during the assume-announce window
    AssumeAnnounce,
    /// Approve or reject a ready plan
    Approval,
    /// Retry / skip / replan / abort after a failed step
    MidExecDecision,
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Clarification => "clarification",
            Self::AssumeAnnounce => "assume_announce",
            Self::Approval => "approval",
            Self::MidExecDecision => "mid_exec_decision",
        };
        write!(f, "{}", name)
    }
}

/// Why a prompt stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptCloseReason {
    Answered,
    TimedOut,
    Stopped,
}

/// Core event enum - the vocabulary of a dialogue session
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DialogueEvent {
    // === Lifecycle ===
    /// Status change or other human-readable progress
    Progress {
        session: SessionKey,
        status: Status,
        message: String,
    },
    /// Task finished successfully
    Complete { session: SessionKey, result: String },
    /// Task ended in the error state
    Error { session: SessionKey, error: String },
    /// Session was stopped and reset to idle
    Stopped { session: SessionKey },

    // === Planning ===
    /// Confidence of the latest plan and the zone it routed to
    ConfidenceReport {
        session: SessionKey,
        confidence: Confidence,
        zone: Zone,
    },
    /// One self-refine round finished
    SelfRefineProgress {
        session: SessionKey,
        iteration: u32,
        max_iterations: u32,
        score: f64,
        improvements: Vec<String>,
    },

    // === Prompts ===
    /// Clarifying questions need an answer
    ClarifyNeeded {
        session: SessionKey,
        questions: Vec<ClarifyingQuestion>,
        round: u32,
        max_rounds: u32,
    },
    /// Assumptions announced; the plan runs unless corrected in time
    AssumeAnnounce {
        session: SessionKey,
        assumptions: Vec<Assumption>,
        plan: Plan,
        auto_execute_delay_ms: u64,
    },
    /// Plan awaits approval
    PlanReady {
        session: SessionKey,
        plan: Plan,
        confidence: Confidence,
    },
    /// A step failed and needs a decision
    MidExecDialog {
        session: SessionKey,
        step_index: usize,
        step: PlanStep,
        error: String,
        timeout_ms: u64,
    },
    /// A pending prompt is no longer accepting answers
    PromptClosed {
        session: SessionKey,
        kind: PromptKind,
        reason: PromptCloseReason,
    },

    // === Execution ===
    /// A step is about to run
    ActionStarted {
        session: SessionKey,
        step_index: usize,
        total_steps: usize,
        step: PlanStep,
    },
    /// A step ran (after any re-resolution)
    Action {
        session: SessionKey,
        step_index: usize,
        action: Action,
        success: bool,
        error: Option<String>,
    },
}

impl DialogueEvent {
    /// Session this event belongs to
    pub fn session(&self) -> &SessionKey {
        match self {
            Self::Progress { session, .. }
            | Self::Complete { session, .. }
            | Self::Error { session, .. }
            | Self::Stopped { session }
            | Self::ConfidenceReport { session, .. }
            | Self::SelfRefineProgress { session, .. }
            | Self::ClarifyNeeded { session, .. }
            | Self::AssumeAnnounce { session, .. }
            | Self::PlanReady { session, .. }
            | Self::MidExecDialog { session, .. }
            | Self::PromptClosed { session, .. }
            | Self::ActionStarted { session, .. }
            | Self::Action { session, .. } => session,
        }
    }

    /// Variant name, for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "Progress",
            Self::Complete { .. } => "Complete",
            Self::Error { .. } => "Error",
            Self::Stopped { .. } => "Stopped",
            Self::ConfidenceReport { .. } => "ConfidenceReport",
            Self::SelfRefineProgress { .. } => "SelfRefineProgress",
            Self::ClarifyNeeded { .. } => "ClarifyNeeded",
            Self::AssumeAnnounce { .. } => "AssumeAnnounce",
            Self::PlanReady { .. } => "PlanReady",
            Self::MidExecDialog { .. } => "MidExecDialog",
            Self::PromptClosed { .. } => "PromptClosed",
            Self::ActionStarted { .. } => "ActionStarted",
            Self::Action { .. } => "Action",
        }
    }

    /// Whether the session run ends with this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. } | Self::Stopped { .. })
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: DialogueEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: DialogueEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
