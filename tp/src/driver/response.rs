//! Human answers to pending prompts

use serde::{Deserialize, Serialize};

use crate::domain::MidExecDecision;
use crate::events::PromptKind;

/// An answer delivered through [`OrchestrationDriver::respond`](super::OrchestrationDriver::respond)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HumanResponse {
    /// Approve (`true`) or reject a ready plan
    Approval { approved: bool },
    /// Answer to clarifying questions, optionally picking one of the offered options
    ClarificationAnswer {
        answer: String,
        selected_option_id: Option<String>,
    },
    /// Correct announced assumptions; triggers a new planning round
    AssumptionCorrection { correction: String },
    /// Cancel the task during the assume-announce window
    AssumptionCancel,
    /// Resolve a failed step
    MidExecDecision { decision: MidExecDecision },
}

impl HumanResponse {
    /// Prompt kind this response answers
    pub fn kind(&self) -> PromptKind {
        match self {
            Self::Approval { .. } => PromptKind::Approval,
            Self::ClarificationAnswer { .. } => PromptKind::Clarification,
            Self::AssumptionCorrection { .. } | Self::AssumptionCancel => PromptKind::AssumeAnnounce,
            Self::MidExecDecision { .. } => PromptKind::MidExecDecision,
        }
    }

    pub fn approve() -> Self {
        Self::Approval { approved: true }
    }

    pub fn reject() -> Self {
        Self::Approval { approved: false }
    }

    pub fn answer(answer: impl Into<String>) -> Self {
        Self::ClarificationAnswer {
            answer: answer.into(),
            selected_option_id: None,
        }
    }

    pub fn choose(answer: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self::ClarificationAnswer {
            answer: answer.into(),
            selected_option_id: Some(option_id.into()),
        }
    }

    pub fn correct(correction: impl Into<String>) -> Self {
        Self::AssumptionCorrection {
            correction: correction.into(),
        }
    }

    pub fn decide(decision: MidExecDecision) -> Self {
        Self::MidExecDecision { decision }
    }
}
