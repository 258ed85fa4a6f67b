//! DialogueController - the session state machine
//!
//! Every operation here is one load -> compute -> save against the
//! SessionStore. Nothing is held in memory between calls, so an operation
//! either saved before a restart (and is visible afterwards) or never
//! happened.

use sessionstore::now_ms;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    Assumption, Checkpoint, ClarifyingQuestion, CompletedStep, Confidence, ExecutionState, FailedStep, MessageType,
    MidExecDecision, PageState, Plan, PlanStep, Role, SessionKey, SessionPatch, SessionState, Status,
};
use crate::state::SessionStore;

use super::error::DialogueError;

pub type DialogueResult<T> = Result<T, DialogueError>;

/// Validated state transitions and state-entry operations
#[derive(Clone)]
pub struct DialogueController {
    store: SessionStore,
}

impl DialogueController {
    pub fn new(store: SessionStore) -> Self {
        debug!("DialogueController::new: called");
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Current persisted state of a session
    pub async fn load(&self, key: &SessionKey) -> DialogueResult<SessionState> {
        Ok(self.store.load(key).await?)
    }

    async fn save(&self, key: &SessionKey, state: &SessionState) -> DialogueResult<()> {
        self.store.save(state, key).await?;
        Ok(())
    }

    /// Move to `status`, merging `updates` and stamping the action time
    pub async fn transition_to(
        &self,
        key: &SessionKey,
        status: Status,
        updates: SessionPatch,
    ) -> DialogueResult<SessionState> {
        debug!(%key, %status, "transition_to: called");
        let mut state = self.store.load(key).await?;
        let from = state.status;
        updates.apply(&mut state);
        state.status = status;
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        info!(%key, %from, to = %status, "Session transitioned");
        Ok(state)
    }

    /// Like [`transition_to`](Self::transition_to) but takes the status by name
    ///
    /// Unknown names are rejected before the store is touched.
    pub async fn transition_to_named(
        &self,
        key: &SessionKey,
        status: &str,
        updates: SessionPatch,
    ) -> DialogueResult<SessionState> {
        debug!(%key, %status, "transition_to_named: called");
        let status: Status = status.parse().map_err(|e| {
            warn!(%key, %status, "transition_to_named: rejected invalid status");
            DialogueError::InvalidStatus(e)
        })?;
        self.transition_to(key, status, updates).await
    }

    /// Begin a new task: fresh state in `planning` seeded with the task
    pub async fn start_planning(&self, key: &SessionKey, task: &str) -> DialogueResult<SessionState> {
        debug!(%key, %task, "start_planning: called");
        let mut state = SessionState::new(&self.store.defaults());
        let now = now_ms();
        state.status = Status::Planning;
        state.current_task = Some(task.to_string());
        state.push_message(Role::User, MessageType::Task, task, None);
        state.start_time = Some(now);
        state.last_action_time = Some(now);
        self.save(key, &state).await?;
        info!(%key, %task, "Planning started");
        Ok(state)
    }

    /// Re-enter `planning` for another planner round on the same task
    ///
    /// Counts the round against the iteration ceiling and gives the next
    /// plan a fresh refine budget and no prior consent.
    pub async fn begin_planning_round(&self, key: &SessionKey) -> DialogueResult<SessionState> {
        debug!(%key, "begin_planning_round: called");
        let mut state = self.store.load(key).await?;
        state.status = Status::Planning;
        state.iteration += 1;
        state.dialogue_state.refine_iteration = 0;
        state.dialogue_state.plan_approved = false;
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Ask the user clarifying questions
    ///
    /// Once the round cap is reached the session goes to `awaiting_approval`
    /// instead, proceeding on a best-effort plan.
    pub async fn enter_clarifying(
        &self,
        key: &SessionKey,
        questions: Vec<ClarifyingQuestion>,
    ) -> DialogueResult<SessionState> {
        debug!(%key, question_count = questions.len(), "enter_clarifying: called");
        let mut state = self.store.load(key).await?;
        let dialogue = &mut state.dialogue_state;

        if dialogue.clarification_round + 1 > dialogue.max_clarification_rounds {
            info!(
                %key,
                rounds = dialogue.clarification_round,
                "Clarification rounds exhausted, proceeding to approval"
            );
            dialogue.pending_questions.clear();
            state.status = Status::AwaitingApproval;
            state.last_action_time = Some(now_ms());
            self.save(key, &state).await?;
            return Ok(state);
        }

        dialogue.clarification_round += 1;
        let joined = questions
            .iter()
            .map(|q| q.question.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        dialogue.pending_questions = questions;
        state.status = Status::Clarifying;
        state.push_message(Role::Assistant, MessageType::Clarification, joined, None);
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Record the user's answer to the pending questions
    ///
    /// Status is left alone; the driver uses
    /// [`replan_with_answer`](Self::replan_with_answer) to record and replan at once.
    pub async fn record_clarification_answer(
        &self,
        key: &SessionKey,
        answer: &str,
        selected_option_id: Option<String>,
    ) -> DialogueResult<SessionState> {
        debug!(%key, ?selected_option_id, "record_clarification_answer: called");
        let mut state = self.store.load(key).await?;
        apply_clarification_answer(&mut state, answer, selected_option_id);
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Record the answer and re-enter `planning` in the same save
    pub async fn replan_with_answer(
        &self,
        key: &SessionKey,
        answer: &str,
        selected_option_id: Option<String>,
    ) -> DialogueResult<SessionState> {
        debug!(%key, ?selected_option_id, "replan_with_answer: called");
        let mut state = self.store.load(key).await?;
        apply_clarification_answer(&mut state, answer, selected_option_id);
        state.status = Status::Planning;
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        info!(%key, "Clarification answered, replanning");
        Ok(state)
    }

    /// Record a correction to the announced assumptions and re-enter
    /// `planning` in the same save
    pub async fn replan_with_correction(&self, key: &SessionKey, correction: &str) -> DialogueResult<SessionState> {
        debug!(%key, "replan_with_correction: called");
        let mut state = self.store.load(key).await?;
        state.dialogue_state.assumptions.clear();
        state.push_message(Role::User, MessageType::AssumptionCorrection, correction, None);
        state.status = Status::Planning;
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        info!(%key, "Assumptions corrected, replanning");
        Ok(state)
    }

    /// Accept the announced assumptions once the correction window passes
    ///
    /// Consent and the next status are saved together: `awaiting_approval`
    /// when the plan already scores `good_enough`, `refining` otherwise.
    pub async fn accept_assumptions(&self, key: &SessionKey, good_enough: f64) -> DialogueResult<SessionState> {
        debug!(%key, good_enough, "accept_assumptions: called");
        let mut state = self.store.load(key).await?;
        state.dialogue_state.plan_approved = true;
        state.status = if state.plan_score() >= good_enough {
            Status::AwaitingApproval
        } else {
            Status::Refining
        };
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        info!(%key, status = %state.status, "Assumptions accepted");
        Ok(state)
    }

    /// Announce assumptions for a medium-confidence plan
    pub async fn enter_assume_announce(
        &self,
        key: &SessionKey,
        assumptions: Vec<Assumption>,
        mut plan: Plan,
    ) -> DialogueResult<SessionState> {
        debug!(%key, assumption_count = assumptions.len(), "enter_assume_announce: called");
        let mut state = self.store.load(key).await?;
        if plan.id.is_empty() {
            stamp_plan(&mut plan, state.plan_history.len());
        }
        let summary = assumptions
            .iter()
            .map(Assumption::describe)
            .collect::<Vec<_>>()
            .join("\n");
        state.status = Status::AssumeAnnounce;
        state.dialogue_state.assumptions = assumptions;
        state.current_plan = Some(plan);
        state.push_message(
            Role::Assistant,
            MessageType::AssumeAnnounce,
            format!("Proceeding with these assumptions:\n{}", summary),
            None,
        );
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Start a self-refine round
    pub async fn enter_refining(&self, key: &SessionKey) -> DialogueResult<SessionState> {
        debug!(%key, "enter_refining: called");
        let mut state = self.store.load(key).await?;
        state.status = Status::Refining;
        state.dialogue_state.refine_iteration += 1;
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Adopt a new plan, archiving the previous one
    pub async fn set_plan(&self, key: &SessionKey, mut plan: Plan, confidence: Confidence) -> DialogueResult<SessionState> {
        debug!(%key, summary = %plan.summary, overall = confidence.overall, "set_plan: called");
        let mut state = self.store.load(key).await?;
        if let Some(previous) = state.current_plan.take() {
            debug!(%key, previous_version = previous.version, "set_plan: archiving previous plan");
            state.plan_history.push(previous);
        }
        stamp_plan(&mut plan, state.plan_history.len());
        info!(%key, plan_id = %plan.id, version = plan.version, steps = plan.steps.len(), "Plan set");
        state.current_plan = Some(plan);
        state.confidence = confidence;
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Record that the user has consented to the current plan
    pub async fn mark_plan_approved(&self, key: &SessionKey) -> DialogueResult<SessionState> {
        debug!(%key, "mark_plan_approved: called");
        let mut state = self.store.load(key).await?;
        state.dialogue_state.plan_approved = true;
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Begin walking the current plan from step 0
    pub async fn start_execution(&self, key: &SessionKey) -> DialogueResult<SessionState> {
        debug!(%key, "start_execution: called");
        let mut state = self.store.load(key).await?;
        let total_steps = state.current_plan.as_ref().ok_or(DialogueError::NoPlan)?.steps.len();
        state.status = Status::Executing;
        state.execution_state = ExecutionState {
            total_steps,
            ..ExecutionState::default()
        };
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        info!(%key, total_steps, "Execution started");
        Ok(state)
    }

    /// Count one step attempt and checkpoint the page it starts from
    pub async fn begin_step(&self, key: &SessionKey, page: PageState) -> DialogueResult<SessionState> {
        debug!(%key, url = %page.url, "begin_step: called");
        let mut state = self.store.load(key).await?;
        let now = now_ms();
        state.iteration += 1;
        state.execution_state.checkpoint = Some(Checkpoint {
            step_index: state.execution_state.current_step_index,
            page,
            timestamp: now,
        });
        state.last_action_time = Some(now);
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Record the current step as done and advance to the next one
    pub async fn record_step_completed(&self, key: &SessionKey, action: &str) -> DialogueResult<SessionState> {
        debug!(%key, %action, "record_step_completed: called");
        let mut state = self.store.load(key).await?;
        let now = now_ms();
        let exec = &mut state.execution_state;
        exec.completed_steps.push(CompletedStep {
            step_index: exec.current_step_index,
            action: action.to_string(),
            timestamp: now,
        });
        exec.current_step_index += 1;
        state.last_action_time = Some(now);
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Point a plan step at a different element after re-resolution
    pub async fn retarget_step(&self, key: &SessionKey, step_index: usize, target: &str) -> DialogueResult<SessionState> {
        debug!(%key, step_index, %target, "retarget_step: called");
        let mut state = self.store.load(key).await?;
        let step = state
            .current_plan
            .as_mut()
            .ok_or(DialogueError::NoPlan)?
            .steps
            .get_mut(step_index)
            .ok_or(DialogueError::StepOutOfRange(step_index))?;
        step.target = Some(target.to_string());
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Pause execution on a failed step and wait for a decision
    pub async fn enter_mid_exec_dialog(
        &self,
        key: &SessionKey,
        failed_step: &PlanStep,
        error: &str,
    ) -> DialogueResult<SessionState> {
        debug!(%key, action = %failed_step.action, %error, "enter_mid_exec_dialog: called");
        let mut state = self.store.load(key).await?;
        let now = now_ms();
        let step_index = state.execution_state.current_step_index;
        state.status = Status::MidExecDialog;
        state.execution_state.failed_steps.push(FailedStep {
            step_index,
            error: error.to_string(),
            retry_count: 0,
            resolution: None,
            timestamp: now,
        });
        state.last_action_time = Some(now);
        self.save(key, &state).await?;
        warn!(%key, step_index, %error, "Step failed, awaiting decision");
        Ok(state)
    }

    /// Resolve the latest failure and move to the decision's status
    pub async fn record_mid_exec_decision(
        &self,
        key: &SessionKey,
        decision: MidExecDecision,
    ) -> DialogueResult<SessionState> {
        debug!(%key, %decision, "record_mid_exec_decision: called");
        let mut state = self.store.load(key).await?;
        let failed = state
            .execution_state
            .failed_steps
            .last_mut()
            .ok_or(DialogueError::NoFailedStep)?;
        failed.resolution = Some(decision);

        match decision {
            MidExecDecision::Retry => {
                failed.retry_count += 1;
            }
            MidExecDecision::Skip => {
                let exec = &mut state.execution_state;
                exec.current_step_index = (exec.current_step_index + 1).min(exec.total_steps);
            }
            MidExecDecision::Replan | MidExecDecision::Abort => {}
        }

        state.status = decision.next_status();
        state.last_action_time = Some(now_ms());
        self.save(key, &state).await?;
        info!(%key, %decision, status = %state.status, "Mid-execution decision recorded");
        Ok(state)
    }

    /// Append an assistant note to the conversation (e.g. replan context)
    pub async fn append_note(&self, key: &SessionKey, note: &str) -> DialogueResult<SessionState> {
        debug!(%key, "append_note: called");
        let mut state = self.store.load(key).await?;
        state.push_message(Role::Assistant, MessageType::Note, note, None);
        self.save(key, &state).await?;
        Ok(state)
    }

    /// Finish the task successfully
    pub async fn complete(&self, key: &SessionKey, result: &str) -> DialogueResult<SessionState> {
        debug!(%key, "complete: called");
        self.transition_to(key, Status::Completed, SessionPatch::default().with_result(result))
            .await
    }

    /// Fail the task with an unrecoverable error
    pub async fn fail(&self, key: &SessionKey, error: &str) -> DialogueResult<SessionState> {
        debug!(%key, %error, "fail: called");
        self.transition_to(key, Status::Error, SessionPatch::default().with_last_error(error))
            .await
    }

    /// Soft reset to idle, keeping conversation and plan history
    pub async fn stop(&self, key: &SessionKey) -> DialogueResult<SessionState> {
        debug!(%key, "stop: called");
        let mut state = self.store.load(key).await?;
        state.reset_to_idle();
        self.save(key, &state).await?;
        info!(%key, "Session stopped");
        Ok(state)
    }

    /// Delete the session record entirely (owning tab closed)
    pub async fn clear_session(&self, key: &SessionKey) -> DialogueResult<bool> {
        debug!(%key, "clear_session: called");
        Ok(self.store.clear(key).await?)
    }
}

fn apply_clarification_answer(state: &mut SessionState, answer: &str, selected_option_id: Option<String>) {
    state.dialogue_state.pending_questions.clear();
    state.push_message(Role::User, MessageType::ClarificationAnswer, answer, selected_option_id);
}

fn stamp_plan(plan: &mut Plan, history_len: usize) {
    plan.id = format!("plan-{}", Uuid::now_v7());
    plan.version = history_len as u32 + 1;
    if plan.created_at == 0 {
        plan.created_at = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::router::{Zone, zone_of};
    use crate::domain::SessionDefaults;

    fn controller() -> DialogueController {
        let store = SessionStore::in_memory(SessionDefaults::default()).unwrap();
        DialogueController::new(store)
    }

    fn key(k: u64) -> SessionKey {
        SessionKey::from(k)
    }

    fn one_step_plan() -> Plan {
        Plan::new("Click submit", vec![PlanStep::new("click", Some("btn-submit"), "Submit button")])
    }

    fn questions() -> Vec<ClarifyingQuestion> {
        vec![
            ClarifyingQuestion::new("Which form?").with_option("a", "Login"),
            ClarifyingQuestion::new("Which account?"),
        ]
    }

    #[tokio::test]
    async fn test_start_planning_seeds_state() {
        let ctl = controller();
        let state = ctl.start_planning(&key(1), "click submit").await.unwrap();
        assert_eq!(state.status, Status::Planning);
        assert_eq!(state.current_task.as_deref(), Some("click submit"));
        assert_eq!(state.conversation_history.len(), 1);
        assert_eq!(state.conversation_history[0].role, Role::User);
        assert_eq!(state.conversation_history[0].message_type, MessageType::Task);
        assert!(state.start_time.is_some());
    }

    #[tokio::test]
    async fn test_start_planning_discards_previous_task() {
        let ctl = controller();
        ctl.start_planning(&key(1), "first").await.unwrap();
        ctl.set_plan(&key(1), one_step_plan(), Confidence::uniform(0.6)).await.unwrap();
        let state = ctl.start_planning(&key(1), "second").await.unwrap();
        assert!(state.current_plan.is_none());
        assert_eq!(state.conversation_history.len(), 1);
        assert_eq!(state.conversation_history[0].content, "second");
    }

    #[tokio::test]
    async fn test_transition_to_valid_status() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        let state = ctl
            .transition_to_named(&key(1), "awaiting_approval", SessionPatch::default())
            .await
            .unwrap();
        assert_eq!(state.status, Status::AwaitingApproval);
        assert!(state.last_action_time.is_some());
    }

    #[tokio::test]
    async fn test_transition_to_invalid_status_rejects_without_mutation() {
        let ctl = controller();
        let before = ctl.start_planning(&key(1), "t").await.unwrap();
        for bogus in ["running", "", "Completed", "paused", "mid-exec-dialog"] {
            let result = ctl
                .transition_to_named(&key(1), bogus, SessionPatch::default().with_result("x"))
                .await;
            assert!(matches!(result, Err(DialogueError::InvalidStatus(_))), "{bogus} should be rejected");
        }
        assert_eq!(ctl.load(&key(1)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_clarifying_rounds_capped() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        for round in 1..=3 {
            let state = ctl.enter_clarifying(&key(1), questions()).await.unwrap();
            assert_eq!(state.status, Status::Clarifying);
            assert_eq!(state.dialogue_state.clarification_round, round);
        }
        let state = ctl.enter_clarifying(&key(1), questions()).await.unwrap();
        assert_eq!(state.status, Status::AwaitingApproval);
        assert_eq!(state.dialogue_state.clarification_round, 3);
        assert!(state.dialogue_state.pending_questions.is_empty());
    }

    #[tokio::test]
    async fn test_clarification_entry_joins_questions() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        let state = ctl.enter_clarifying(&key(1), questions()).await.unwrap();
        let entry = state.conversation_history.last().unwrap();
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.message_type, MessageType::Clarification);
        assert!(entry.content.contains("Which form?"));
        assert!(entry.content.contains("Which account?"));
        assert_eq!(state.dialogue_state.pending_questions.len(), 2);
    }

    #[tokio::test]
    async fn test_scenario_b_clarification_answer() {
        let ctl = controller();
        ctl.start_planning(&key(1), "do the thing").await.unwrap();
        ctl.set_plan(&key(1), one_step_plan(), Confidence::uniform(0.3)).await.unwrap();
        assert_eq!(zone_of(0.3), Zone::Ask);

        let state = ctl.enter_clarifying(&key(1), questions()).await.unwrap();
        assert_eq!(state.status, Status::Clarifying);

        let state = ctl
            .record_clarification_answer(&key(1), "X", Some("a".to_string()))
            .await
            .unwrap();
        assert_eq!(state.dialogue_state.pending_questions.len(), 0);
        assert_eq!(state.status, Status::Clarifying);
        let entry = state.conversation_history.last().unwrap();
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.message_type, MessageType::ClarificationAnswer);
        assert_eq!(entry.content, "X");
        assert_eq!(entry.selected_option_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_scenario_c_assume_announce() {
        let ctl = controller();
        ctl.start_planning(&key(1), "submit the form").await.unwrap();
        assert_eq!(zone_of(0.7), Zone::AssumeAnnounce);

        let assumptions = vec![Assumption::new("target", "Submit button", 0.7)];
        let state = ctl
            .enter_assume_announce(&key(1), assumptions, one_step_plan())
            .await
            .unwrap();
        assert_eq!(state.status, Status::AssumeAnnounce);
        assert_eq!(state.dialogue_state.assumptions.len(), 1);
        let plan = state.current_plan.as_ref().unwrap();
        assert!(!plan.id.is_empty());
        assert_eq!(plan.version, 1);
        assert!(
            state
                .conversation_history
                .iter()
                .any(|e| e.content.contains("target: Submit button"))
        );
    }

    #[tokio::test]
    async fn test_replan_with_answer_saves_answer_and_status_together() {
        let ctl = controller();
        ctl.start_planning(&key(1), "do the thing").await.unwrap();
        ctl.enter_clarifying(&key(1), questions()).await.unwrap();

        ctl.replan_with_answer(&key(1), "X", Some("a".to_string()))
            .await
            .unwrap();
        let stored = ctl.load(&key(1)).await.unwrap();
        assert_eq!(stored.status, Status::Planning);
        assert!(stored.dialogue_state.pending_questions.is_empty());
        let entry = stored.conversation_history.last().unwrap();
        assert_eq!(entry.message_type, MessageType::ClarificationAnswer);
        assert_eq!(entry.selected_option_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_replan_with_correction_saves_correction_and_status_together() {
        let ctl = controller();
        ctl.start_planning(&key(1), "submit").await.unwrap();
        let assumptions = vec![Assumption::new("target", "Submit button", 0.7)];
        ctl.enter_assume_announce(&key(1), assumptions, one_step_plan())
            .await
            .unwrap();

        ctl.replan_with_correction(&key(1), "use the blue button").await.unwrap();
        let stored = ctl.load(&key(1)).await.unwrap();
        assert_eq!(stored.status, Status::Planning);
        assert!(stored.dialogue_state.assumptions.is_empty());
        let entry = stored.conversation_history.last().unwrap();
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.message_type, MessageType::AssumptionCorrection);
        assert_eq!(entry.content, "use the blue button");
    }

    #[tokio::test]
    async fn test_accept_assumptions_routes_on_plan_score() {
        let ctl = controller();
        ctl.start_planning(&key(1), "submit").await.unwrap();
        ctl.set_plan(&key(1), one_step_plan(), Confidence::uniform(0.7)).await.unwrap();
        let state = ctl.accept_assumptions(&key(1), 0.9).await.unwrap();
        assert_eq!(state.status, Status::Refining);
        assert!(state.dialogue_state.plan_approved);

        ctl.start_planning(&key(2), "submit").await.unwrap();
        let mut plan = one_step_plan();
        plan.score = Some(0.95);
        ctl.set_plan(&key(2), plan, Confidence::uniform(0.7)).await.unwrap();
        ctl.accept_assumptions(&key(2), 0.9).await.unwrap();
        let stored = ctl.load(&key(2)).await.unwrap();
        assert_eq!(stored.status, Status::AwaitingApproval);
        assert!(stored.dialogue_state.plan_approved);
    }

    #[tokio::test]
    async fn test_enter_refining_increments_without_cap() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        for _ in 0..5 {
            ctl.enter_refining(&key(1)).await.unwrap();
        }
        let state = ctl.load(&key(1)).await.unwrap();
        assert_eq!(state.status, Status::Refining);
        assert_eq!(state.dialogue_state.refine_iteration, 5);
    }

    #[tokio::test]
    async fn test_set_plan_twice_archives_once() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        let first = ctl.set_plan(&key(1), one_step_plan(), Confidence::uniform(0.5)).await.unwrap();
        assert_eq!(first.current_plan.as_ref().unwrap().version, 1);
        assert!(first.plan_history.is_empty());

        let second = ctl
            .set_plan(&key(1), Plan::new("Other", vec![]), Confidence::uniform(0.95))
            .await
            .unwrap();
        assert_eq!(second.plan_history.len(), 1);
        assert_eq!(second.current_plan.as_ref().unwrap().version, 2);
        assert_eq!(second.plan_history[0].summary, "Click submit");
        assert_eq!(second.confidence.overall, 0.95);
        assert_ne!(second.plan_history[0].id, second.current_plan.as_ref().unwrap().id);
    }

    #[tokio::test]
    async fn test_start_execution_requires_plan() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        assert!(matches!(ctl.start_execution(&key(1)).await, Err(DialogueError::NoPlan)));
    }

    #[tokio::test]
    async fn test_start_execution_resets_progress() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        ctl.set_plan(&key(1), one_step_plan(), Confidence::uniform(0.95)).await.unwrap();
        let state = ctl.start_execution(&key(1)).await.unwrap();
        assert_eq!(state.status, Status::Executing);
        assert_eq!(state.execution_state.total_steps, 1);
        assert_eq!(state.execution_state.current_step_index, 0);
        assert!(state.execution_state.completed_steps.is_empty());
    }

    async fn executing_session(ctl: &DialogueController, k: &SessionKey, steps: usize) {
        ctl.start_planning(k, "t").await.unwrap();
        let plan = Plan::new(
            "multi",
            (0..steps)
                .map(|i| PlanStep::new("click", Some(&format!("el-{i}")), format!("button {i}")))
                .collect(),
        );
        ctl.set_plan(k, plan, Confidence::uniform(0.95)).await.unwrap();
        ctl.start_execution(k).await.unwrap();
    }

    #[tokio::test]
    async fn test_mid_exec_skip_and_retry() {
        let ctl = controller();
        let k = key(5);
        executing_session(&ctl, &k, 3).await;
        let step = PlanStep::new("click", Some("el-0"), "button 0");

        ctl.enter_mid_exec_dialog(&k, &step, "boom").await.unwrap();
        let state = ctl.record_mid_exec_decision(&k, MidExecDecision::Retry).await.unwrap();
        assert_eq!(state.status, Status::Executing);
        assert_eq!(state.execution_state.current_step_index, 0);
        assert_eq!(state.execution_state.failed_steps[0].retry_count, 1);

        ctl.enter_mid_exec_dialog(&k, &step, "boom again").await.unwrap();
        let state = ctl.record_mid_exec_decision(&k, MidExecDecision::Skip).await.unwrap();
        assert_eq!(state.status, Status::Executing);
        assert_eq!(state.execution_state.current_step_index, 1);
    }

    #[tokio::test]
    async fn test_mid_exec_abort_and_replan() {
        let ctl = controller();
        let k = key(6);
        executing_session(&ctl, &k, 2).await;
        let step = PlanStep::new("click", Some("el-0"), "button 0");

        ctl.enter_mid_exec_dialog(&k, &step, "e1").await.unwrap();
        let state = ctl.record_mid_exec_decision(&k, MidExecDecision::Replan).await.unwrap();
        assert_eq!(state.status, Status::Replanning);

        ctl.enter_mid_exec_dialog(&k, &step, "e2").await.unwrap();
        let state = ctl.record_mid_exec_decision(&k, MidExecDecision::Abort).await.unwrap();
        assert_eq!(state.status, Status::Idle);
        assert_eq!(state.execution_state.failed_steps.len(), 2);
    }

    #[tokio::test]
    async fn test_decision_without_failure_is_error() {
        let ctl = controller();
        executing_session(&ctl, &key(7), 1).await;
        let result = ctl.record_mid_exec_decision(&key(7), MidExecDecision::Skip).await;
        assert!(matches!(result, Err(DialogueError::NoFailedStep)));
    }

    #[tokio::test]
    async fn test_scenario_d_three_failures_in_order() {
        let ctl = controller();
        let k = key(8);
        executing_session(&ctl, &k, 5).await;
        let step = PlanStep::new("click", Some("el"), "button");
        let decisions = [MidExecDecision::Retry, MidExecDecision::Skip, MidExecDecision::Retry];

        for (i, decision) in decisions.iter().enumerate() {
            ctl.enter_mid_exec_dialog(&k, &step, &format!("failure {i}")).await.unwrap();
            ctl.record_mid_exec_decision(&k, *decision).await.unwrap();
        }

        let state = ctl.load(&k).await.unwrap();
        let failed = &state.execution_state.failed_steps;
        assert_eq!(failed.len(), 3);
        for (i, decision) in decisions.iter().enumerate() {
            assert_eq!(failed[i].resolution, Some(*decision));
            assert_eq!(failed[i].error, format!("failure {i}"));
        }
        assert_eq!(failed[0].step_index, 0);
        assert_eq!(failed[2].step_index, 1);
    }

    #[tokio::test]
    async fn test_long_error_text_stored_verbatim() {
        let ctl = controller();
        let k = key(9);
        executing_session(&ctl, &k, 1).await;
        let long_error = "x".repeat(20_000) + " trailing detail";
        let step = PlanStep::new("click", Some("el"), "button");
        let state = ctl.enter_mid_exec_dialog(&k, &step, &long_error).await.unwrap();
        assert_eq!(state.execution_state.failed_steps[0].error, long_error);
    }

    #[tokio::test]
    async fn test_step_bookkeeping() {
        let ctl = controller();
        let k = key(11);
        executing_session(&ctl, &k, 2).await;

        let state = ctl.begin_step(&k, PageState::new("https://example.com", vec![])).await.unwrap();
        assert_eq!(state.iteration, 1);
        let checkpoint = state.execution_state.checkpoint.as_ref().unwrap();
        assert_eq!(checkpoint.step_index, 0);
        assert_eq!(checkpoint.page.url, "https://example.com");

        let state = ctl.retarget_step(&k, 0, "el-new").await.unwrap();
        assert_eq!(state.current_plan.as_ref().unwrap().steps[0].target.as_deref(), Some("el-new"));

        let state = ctl.record_step_completed(&k, "click").await.unwrap();
        assert_eq!(state.execution_state.current_step_index, 1);
        assert_eq!(state.execution_state.completed_steps[0].step_index, 0);
        assert_eq!(state.execution_state.completed_steps[0].action, "click");
    }

    #[tokio::test]
    async fn test_stop_soft_resets() {
        let ctl = controller();
        let k = key(10);
        executing_session(&ctl, &k, 2).await;
        ctl.set_plan(&k, one_step_plan(), Confidence::uniform(0.9)).await.unwrap();

        let state = ctl.stop(&k).await.unwrap();
        assert_eq!(state.status, Status::Idle);
        assert!(state.current_task.is_none());
        assert!(state.current_plan.is_none());
        assert_eq!(state.execution_state, ExecutionState::default());
        assert_eq!(state.confidence, Confidence::default());
        assert_eq!(state.plan_history.len(), 1);
        assert_eq!(state.conversation_history.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let ctl = controller();
        ctl.start_planning(&key(111), "task one").await.unwrap();
        ctl.start_planning(&key(222), "task two").await.unwrap();

        ctl.enter_clarifying(&key(111), questions()).await.unwrap();
        let other = ctl.load(&key(222)).await.unwrap();
        assert_eq!(other.status, Status::Planning);
        assert_eq!(other.current_task.as_deref(), Some("task two"));
        assert_eq!(other.dialogue_state.clarification_round, 0);

        ctl.stop(&key(222)).await.unwrap();
        let first = ctl.load(&key(111)).await.unwrap();
        assert_eq!(first.status, Status::Clarifying);
        assert_eq!(first.current_task.as_deref(), Some("task one"));
        assert_eq!(first.dialogue_state.clarification_round, 1);
    }

    #[tokio::test]
    async fn test_begin_planning_round_counts_iteration() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        ctl.enter_refining(&key(1)).await.unwrap();
        ctl.mark_plan_approved(&key(1)).await.unwrap();
        let state = ctl.begin_planning_round(&key(1)).await.unwrap();
        assert_eq!(state.status, Status::Planning);
        assert_eq!(state.iteration, 1);
        assert_eq!(state.dialogue_state.refine_iteration, 0);
        assert!(!state.dialogue_state.plan_approved);
    }

    #[tokio::test]
    async fn test_complete_and_fail() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        let done = ctl.complete(&key(1), "Clicked submit").await.unwrap();
        assert_eq!(done.status, Status::Completed);
        assert_eq!(done.result.as_deref(), Some("Clicked submit"));

        ctl.start_planning(&key(2), "t").await.unwrap();
        let failed = ctl.fail(&key(2), "planner down").await.unwrap();
        assert_eq!(failed.status, Status::Error);
        assert_eq!(failed.last_error.as_deref(), Some("planner down"));
    }

    #[tokio::test]
    async fn test_clear_session() {
        let ctl = controller();
        ctl.start_planning(&key(1), "t").await.unwrap();
        assert!(ctl.clear_session(&key(1)).await.unwrap());
        assert_eq!(ctl.load(&key(1)).await.unwrap(), SessionState::default());
    }
}
