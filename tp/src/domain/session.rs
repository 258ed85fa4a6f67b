//! SessionState - the persisted record behind one dialogue session
//!
//! Every field a restarted process needs to pick a session back up lives
//! here. Values are built through constructors (`SessionState::fresh`,
//! `Default`), never by copying a shared template.

use serde::{Deserialize, Serialize};
use sessionstore::{Record, now_ms};
use tracing::debug;

use super::page::PageState;
use super::plan::{Assumption, ClarifyingQuestion, Confidence, Plan};
use super::status::{MidExecDecision, Status};

/// Default cap on clarification rounds
pub const DEFAULT_MAX_CLARIFICATION_ROUNDS: u32 = 3;

/// Default cap on self-refine rounds
pub const DEFAULT_MAX_REFINE_ITERATIONS: u32 = 3;

/// Default assume-announce correction window
pub const DEFAULT_AUTO_EXECUTE_DELAY_MS: u64 = 3000;

/// Default global step-count ceiling
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Limits stamped into every fresh session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDefaults {
    pub max_clarification_rounds: u32,
    pub max_refine_iterations: u32,
    pub auto_execute_delay_ms: u64,
    pub max_iterations: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            max_clarification_rounds: DEFAULT_MAX_CLARIFICATION_ROUNDS,
            max_refine_iterations: DEFAULT_MAX_REFINE_ITERATIONS,
            auto_execute_delay_ms: DEFAULT_AUTO_EXECUTE_DELAY_MS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Who authored a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// What a conversation entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Clarification,
    ClarificationAnswer,
    AssumeAnnounce,
    AssumptionCorrection,
    Note,
}

/// One entry of the append-only conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<String>,
}

/// Clarification / refinement bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogueState {
    pub clarification_round: u32,
    pub max_clarification_rounds: u32,
    pub refine_iteration: u32,
    pub max_refine_iterations: u32,
    pub pending_questions: Vec<ClarifyingQuestion>,
    pub assumptions: Vec<Assumption>,
    pub auto_execute_delay_ms: u64,
    /// Set once an assume-announce window elapsed without correction
    pub plan_approved: bool,
}

impl DialogueState {
    pub fn new(defaults: &SessionDefaults) -> Self {
        Self {
            clarification_round: 0,
            max_clarification_rounds: defaults.max_clarification_rounds,
            refine_iteration: 0,
            max_refine_iterations: defaults.max_refine_iterations,
            pending_questions: Vec::new(),
            assumptions: Vec::new(),
            auto_execute_delay_ms: defaults.auto_execute_delay_ms,
            plan_approved: false,
        }
    }
}

impl Default for DialogueState {
    fn default() -> Self {
        Self::new(&SessionDefaults::default())
    }
}

/// A step that ran successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStep {
    pub step_index: usize,
    pub action: String,
    pub timestamp: i64,
}

/// A step failure and how the user resolved it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedStep {
    pub step_index: usize,
    /// Executor error, verbatim
    pub error: String,
    pub retry_count: u32,
    pub resolution: Option<MidExecDecision>,
    pub timestamp: i64,
}

/// Progress snapshot taken before each step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub step_index: usize,
    pub page: PageState,
    pub timestamp: i64,
}

/// Where execution of the current plan stands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionState {
    pub current_step_index: usize,
    pub total_steps: usize,
    pub completed_steps: Vec<CompletedStep>,
    pub failed_steps: Vec<FailedStep>,
    pub checkpoint: Option<Checkpoint>,
}

impl ExecutionState {
    /// Failure record still waiting on a decision, if any
    pub fn unresolved_failure(&self) -> Option<&FailedStep> {
        self.failed_steps.last().filter(|f| f.resolution.is_none())
    }
}

/// The persisted state of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: Status,

    #[serde(default)]
    pub current_task: Option<String>,

    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,

    #[serde(default)]
    pub dialogue_state: DialogueState,

    #[serde(default)]
    pub execution_state: ExecutionState,

    #[serde(default)]
    pub current_plan: Option<Plan>,

    /// Superseded plans, oldest first
    #[serde(default)]
    pub plan_history: Vec<Plan>,

    #[serde(default)]
    pub confidence: Confidence,

    #[serde(default)]
    pub iteration: u32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default)]
    pub start_time: Option<i64>,

    #[serde(default)]
    pub last_action_time: Option<i64>,

    #[serde(default)]
    pub last_error: Option<String>,

    /// Human-facing result once completed
    #[serde(default)]
    pub result: Option<String>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Record for SessionState {
    fn collection_name() -> &'static str {
        "sessions"
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(&SessionDefaults::default())
    }
}

impl SessionState {
    /// A new idle session carrying the given limits
    pub fn new(defaults: &SessionDefaults) -> Self {
        Self {
            status: Status::Idle,
            current_task: None,
            conversation_history: Vec::new(),
            dialogue_state: DialogueState::new(defaults),
            execution_state: ExecutionState::default(),
            current_plan: None,
            plan_history: Vec::new(),
            confidence: Confidence::default(),
            iteration: 0,
            max_iterations: defaults.max_iterations,
            start_time: None,
            last_action_time: None,
            last_error: None,
            result: None,
        }
    }

    /// Limits this session was created with
    pub fn defaults(&self) -> SessionDefaults {
        SessionDefaults {
            max_clarification_rounds: self.dialogue_state.max_clarification_rounds,
            max_refine_iterations: self.dialogue_state.max_refine_iterations,
            auto_execute_delay_ms: self.dialogue_state.auto_execute_delay_ms,
            max_iterations: self.max_iterations,
        }
    }

    /// Score of the current plan, falling back to the overall confidence
    pub fn plan_score(&self) -> f64 {
        self.current_plan
            .as_ref()
            .and_then(|p| p.score)
            .unwrap_or(self.confidence.overall)
    }

    /// Append to the conversation log
    ///
    /// Timestamps never go backwards even if the wall clock does.
    pub fn push_message(
        &mut self,
        role: Role,
        message_type: MessageType,
        content: impl Into<String>,
        selected_option_id: Option<String>,
    ) {
        let content = content.into();
        debug!(?role, ?message_type, content_len = content.len(), "push_message: called");
        let floor = self.conversation_history.last().map(|e| e.timestamp).unwrap_or(i64::MIN);
        self.conversation_history.push(ConversationEntry {
            role,
            content,
            timestamp: now_ms().max(floor),
            message_type,
            selected_option_id,
        });
    }

    /// Soft reset to idle, keeping the audit trail
    ///
    /// Conversation and plan history survive; everything describing the
    /// in-flight task returns to its default.
    pub fn reset_to_idle(&mut self) {
        debug!(status = %self.status, "reset_to_idle: called");
        let defaults = self.defaults();
        self.status = Status::Idle;
        self.current_task = None;
        self.dialogue_state = DialogueState::new(&defaults);
        self.execution_state = ExecutionState::default();
        self.current_plan = None;
        self.confidence = Confidence::default();
        self.iteration = 0;
        self.last_error = None;
        self.result = None;
        self.last_action_time = Some(now_ms());
    }
}

/// Shallow update of a SessionState: every `Some` field replaces the stored one
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<Status>,
    pub current_task: Option<Option<String>>,
    pub conversation_history: Option<Vec<ConversationEntry>>,
    pub dialogue_state: Option<DialogueState>,
    pub execution_state: Option<ExecutionState>,
    pub current_plan: Option<Option<Plan>>,
    pub plan_history: Option<Vec<Plan>>,
    pub confidence: Option<Confidence>,
    pub iteration: Option<u32>,
    pub max_iterations: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub result: Option<Option<String>>,
}

impl SessionPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(Some(result.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.current_task.is_none()
            && self.conversation_history.is_none()
            && self.dialogue_state.is_none()
            && self.execution_state.is_none()
            && self.current_plan.is_none()
            && self.plan_history.is_none()
            && self.confidence.is_none()
            && self.iteration.is_none()
            && self.max_iterations.is_none()
            && self.last_error.is_none()
            && self.result.is_none()
    }

    /// Merge into `state`
    pub fn apply(self, state: &mut SessionState) {
        debug!(status = ?self.status, "SessionPatch::apply: called");
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(task) = self.current_task {
            state.current_task = task;
        }
        if let Some(history) = self.conversation_history {
            state.conversation_history = history;
        }
        if let Some(dialogue) = self.dialogue_state {
            state.dialogue_state = dialogue;
        }
        if let Some(execution) = self.execution_state {
            state.execution_state = execution;
        }
        if let Some(plan) = self.current_plan {
            state.current_plan = plan;
        }
        if let Some(history) = self.plan_history {
            state.plan_history = history;
        }
        if let Some(confidence) = self.confidence {
            state.confidence = confidence;
        }
        if let Some(iteration) = self.iteration {
            state.iteration = iteration;
        }
        if let Some(max) = self.max_iterations {
            state.max_iterations = max;
        }
        if let Some(error) = self.last_error {
            state.last_error = error;
        }
        if let Some(result) = self.result {
            state.result = result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlanStep;

    #[test]
    fn test_fresh_state_defaults() {
        let state = SessionState::default();
        assert_eq!(state.status, Status::Idle);
        assert!(state.current_task.is_none());
        assert_eq!(state.dialogue_state.max_clarification_rounds, 3);
        assert_eq!(state.dialogue_state.max_refine_iterations, 3);
        assert_eq!(state.dialogue_state.auto_execute_delay_ms, 3000);
        assert_eq!(state.max_iterations, DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn test_fresh_states_do_not_alias() {
        let mut a = SessionState::default();
        let b = SessionState::default();
        a.dialogue_state.pending_questions.push(ClarifyingQuestion::new("which?"));
        assert!(b.dialogue_state.pending_questions.is_empty());
    }

    #[test]
    fn test_push_message_timestamps_non_decreasing() {
        let mut state = SessionState::default();
        state.push_message(Role::User, MessageType::Task, "first", None);
        // Simulate a clock that ran ahead
        state.conversation_history[0].timestamp = i64::MAX - 1;
        state.push_message(Role::Assistant, MessageType::Note, "second", None);
        let history = &state.conversation_history;
        assert!(history[1].timestamp >= history[0].timestamp);
    }

    #[test]
    fn test_reset_to_idle_keeps_audit_trail() {
        let mut state = SessionState::default();
        state.status = Status::Executing;
        state.current_task = Some("click submit".to_string());
        state.push_message(Role::User, MessageType::Task, "click submit", None);
        state.plan_history.push(Plan::new("old", vec![]));
        state.current_plan = Some(Plan::new("new", vec![PlanStep::new("click", Some("b"), "b")]));
        state.confidence = Confidence::uniform(0.8);
        state.dialogue_state.clarification_round = 2;
        state.execution_state.current_step_index = 1;

        state.reset_to_idle();

        assert_eq!(state.status, Status::Idle);
        assert!(state.current_task.is_none());
        assert!(state.current_plan.is_none());
        assert_eq!(state.confidence, Confidence::default());
        assert_eq!(state.dialogue_state.clarification_round, 0);
        assert_eq!(state.execution_state, ExecutionState::default());
        assert_eq!(state.conversation_history.len(), 1);
        assert_eq!(state.plan_history.len(), 1);
    }

    #[test]
    fn test_reset_preserves_custom_limits() {
        let defaults = SessionDefaults {
            max_clarification_rounds: 5,
            max_refine_iterations: 1,
            auto_execute_delay_ms: 10,
            max_iterations: 7,
        };
        let mut state = SessionState::new(&defaults);
        state.reset_to_idle();
        assert_eq!(state.defaults(), defaults);
    }

    #[test]
    fn test_patch_applies_only_some_fields() {
        let mut state = SessionState::default();
        state.current_task = Some("keep me".to_string());
        SessionPatch::status(Status::Planning).with_result("done").apply(&mut state);
        assert_eq!(state.status, Status::Planning);
        assert_eq!(state.current_task.as_deref(), Some("keep me"));
        assert_eq!(state.result.as_deref(), Some("done"));
    }

    #[test]
    fn test_patch_can_clear_optional_field() {
        let mut state = SessionState::default();
        state.current_task = Some("task".to_string());
        let patch = SessionPatch {
            current_task: Some(None),
            ..SessionPatch::default()
        };
        assert!(!patch.is_empty());
        patch.apply(&mut state);
        assert!(state.current_task.is_none());
    }

    #[test]
    fn test_unresolved_failure() {
        let mut exec = ExecutionState::default();
        assert!(exec.unresolved_failure().is_none());
        exec.failed_steps.push(FailedStep {
            step_index: 0,
            error: "x".to_string(),
            retry_count: 0,
            resolution: None,
            timestamp: 0,
        });
        assert!(exec.unresolved_failure().is_some());
        exec.failed_steps[0].resolution = Some(MidExecDecision::Skip);
        assert!(exec.unresolved_failure().is_none());
    }

    #[test]
    fn test_persisted_layout_is_camel_case() {
        let state = SessionState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("conversationHistory").is_some());
        assert!(json.get("dialogueState").unwrap().get("maxClarificationRounds").is_some());
        assert!(json.get("executionState").unwrap().get("currentStepIndex").is_some());
        assert_eq!(json.get("status").unwrap(), "idle");
    }
}
