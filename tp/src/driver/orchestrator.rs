//! OrchestrationDriver - runs sessions through the persisted state machine
//!
//! A run is a loop: load the session, dispatch on its status, do that
//! state's work (which always saves a new status), repeat until the
//! session is terminal or idle. The dispatch reads nothing but persisted
//! state, so `resume` after a restart continues from the last saved
//! transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{DriverError, DriverResult};
use super::registry::SessionRegistry;
use super::response::HumanResponse;
use crate::bridge::{ActionExecutor, PageStateProvider, PlanningService};
use crate::config::Config;
use crate::dialogue::{ConfidenceRouter, DEFAULT_GOOD_ENOUGH, DialogueController, DialogueError, SelfRefineLoop, Zone};
use crate::domain::{MidExecDecision, PlanStep, SessionKey, SessionPatch, SessionState, Status};
use crate::events::{DialogueEvent, EventBus, EventEmitter, PromptCloseReason, PromptKind};
use crate::execution::{DEFAULT_STEP_DELAY_MS, DecisionSource, ExecutionEngine, ExecutionOutcome};

/// Default wait for a mid-execution decision before skipping the step
pub const DEFAULT_MID_EXEC_TIMEOUT_MS: u64 = 30_000;

/// Driver tuning that is not stored per session
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub router: ConfidenceRouter,
    pub refine_good_enough: f64,
    pub mid_exec_timeout: Duration,
    pub step_delay: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            router: ConfidenceRouter::default(),
            refine_good_enough: DEFAULT_GOOD_ENOUGH,
            mid_exec_timeout: Duration::from_millis(DEFAULT_MID_EXEC_TIMEOUT_MS),
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
        }
    }
}

impl DriverConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            router: ConfidenceRouter::new(config.dialogue.ask_below, config.dialogue.proceed_at),
            refine_good_enough: config.dialogue.refine_good_enough,
            mid_exec_timeout: Duration::from_millis(config.dialogue.mid_exec_timeout_ms),
            step_delay: Duration::from_millis(config.execution.step_delay_ms),
        }
    }
}

/// How a session run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { result: String },
    Failed { error: String },
    /// Rejected, cancelled or aborted by the user
    Idle,
    /// Interrupted by `stop`
    Stopped,
}

/// How a prompt resolved
enum PromptResult {
    Answered(HumanResponse),
    TimedOut,
    /// The prompt was dropped by `stop`
    Closed,
}

struct Inner {
    controller: DialogueController,
    planner: Arc<dyn PlanningService>,
    page: Arc<dyn PageStateProvider>,
    executor: Arc<dyn ActionExecutor>,
    bus: Arc<EventBus>,
    registry: SessionRegistry,
    config: DriverConfig,
}

/// Drives any number of independent sessions
#[derive(Clone)]
pub struct OrchestrationDriver {
    inner: Arc<Inner>,
}

impl OrchestrationDriver {
    pub fn new(
        controller: DialogueController,
        planner: Arc<dyn PlanningService>,
        page: Arc<dyn PageStateProvider>,
        executor: Arc<dyn ActionExecutor>,
        bus: Arc<EventBus>,
        config: DriverConfig,
    ) -> Self {
        debug!(?config, "OrchestrationDriver::new: called");
        Self {
            inner: Arc::new(Inner {
                controller,
                planner,
                page,
                executor,
                bus,
                registry: SessionRegistry::new(),
                config,
            }),
        }
    }

    pub fn controller(&self) -> &DialogueController {
        &self.inner.controller
    }

    /// Subscribe to events from every session
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DialogueEvent> {
        self.inner.bus.subscribe()
    }

    /// Begin `task` on `key`, discarding whatever the session held before
    pub async fn start(&self, key: &SessionKey, task: &str) -> DriverResult<JoinHandle<RunOutcome>> {
        debug!(%key, %task, "start: called");
        let ticket = self.inner.registry.register(key).await?;
        if let Err(e) = self.inner.controller.start_planning(key, task).await {
            self.inner.registry.finish(key, ticket.run_id).await;
            return Err(e.into());
        }
        info!(%key, %task, "Session started");
        Ok(self.spawn_run(key, ticket.run_id, ticket.stop_rx, ticket.done_tx))
    }

    /// Continue a session from its persisted status
    pub async fn resume(&self, key: &SessionKey) -> DriverResult<JoinHandle<RunOutcome>> {
        debug!(%key, "resume: called");
        let ticket = self.inner.registry.register(key).await?;
        info!(%key, "Session resumed");
        Ok(self.spawn_run(key, ticket.run_id, ticket.stop_rx, ticket.done_tx))
    }

    /// Answer the session's pending prompt
    pub async fn respond(&self, key: &SessionKey, response: HumanResponse) -> DriverResult<()> {
        debug!(%key, kind = %response.kind(), "respond: called");
        self.inner.registry.deliver(key, response).await
    }

    /// Kind of prompt the session is waiting on, if any
    pub async fn pending_prompt(&self, key: &SessionKey) -> Option<PromptKind> {
        self.inner.registry.pending_kind(key).await
    }

    pub async fn is_running(&self, key: &SessionKey) -> bool {
        self.inner.registry.is_running(key).await
    }

    /// Stop the session in whatever state it is and reset it to idle
    ///
    /// Waits for a running task to exit first, so nothing it does can land
    /// after the reset.
    pub async fn stop(&self, key: &SessionKey) -> DriverResult<SessionState> {
        debug!(%key, "stop: called");
        let emitter = self.inner.bus.emitter_for(key);
        let ticket = self.inner.registry.begin_stop(key).await;

        let mut run_id = None;
        if let Some(ticket) = ticket {
            if let Some(kind) = ticket.closed_prompt {
                emitter.prompt_closed(kind, PromptCloseReason::Stopped);
            }
            if let Some(done_rx) = ticket.done_rx {
                let _ = done_rx.await;
            }
            run_id = Some(ticket.run_id);
        }

        let result = self.inner.controller.stop(key).await;
        if let Some(run_id) = run_id {
            self.inner.registry.finish_stop(key, run_id).await;
        }
        let state = result?;
        emitter.stopped();
        info!(%key, "Session stopped");
        Ok(state)
    }

    /// Stop the session if needed and delete its record
    pub async fn clear_session(&self, key: &SessionKey) -> DriverResult<bool> {
        debug!(%key, "clear_session: called");
        if self.is_running(key).await {
            self.stop(key).await?;
        }
        Ok(self.inner.controller.clear_session(key).await?)
    }

    fn spawn_run(
        &self,
        key: &SessionKey,
        run_id: u64,
        mut stop_rx: watch::Receiver<bool>,
        done_tx: oneshot::Sender<()>,
    ) -> JoinHandle<RunOutcome> {
        let inner = self.inner.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let _done = done_tx;
            let emitter = inner.bus.emitter_for(&key);

            let result = tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => Ok(RunOutcome::Stopped),
                r = inner.drive(&key, &emitter) => r,
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(_) if *stop_rx.borrow() => RunOutcome::Stopped,
                Err(e) => {
                    error!(%key, error = %e, "Session run failed");
                    let message = e.to_string();
                    if let Err(e) = inner.controller.fail(&key, &message).await {
                        error!(%key, error = %e, "Failed to record session failure");
                    }
                    RunOutcome::Failed { error: message }
                }
            };

            match &outcome {
                RunOutcome::Completed { result } => emitter.complete(result.clone()),
                RunOutcome::Failed { error } => emitter.error(error.clone()),
                RunOutcome::Idle => emitter.progress(Status::Idle, "Session idle"),
                RunOutcome::Stopped => {}
            }

            inner.registry.finish(&key, run_id).await;
            info!(%key, ?outcome, "Session run finished");
            outcome
        })
    }
}

impl Inner {
    async fn drive(&self, key: &SessionKey, emitter: &EventEmitter) -> DriverResult<RunOutcome> {
        debug!(%key, "drive: called");
        loop {
            let state = self.controller.load(key).await?;
            debug!(%key, status = %state.status, "drive: dispatching");
            match state.status {
                Status::Idle => return Ok(RunOutcome::Idle),
                Status::Completed => {
                    return Ok(RunOutcome::Completed {
                        result: state.result.unwrap_or_default(),
                    });
                }
                Status::Error => {
                    return Ok(RunOutcome::Failed {
                        error: state.last_error.unwrap_or_default(),
                    });
                }
                Status::Planning | Status::Replanning => self.plan(key, emitter).await?,
                Status::Clarifying => self.clarify(key, &state, emitter).await?,
                Status::AssumeAnnounce => self.assume_announce(key, &state, emitter).await?,
                Status::Refining => self.refine(key, &state, emitter).await?,
                Status::AwaitingApproval => self.await_approval(key, &state, emitter).await?,
                Status::Executing | Status::MidExecDialog => self.execute(key, emitter).await?,
            }
        }
    }

    async fn fail(&self, key: &SessionKey, emitter: &EventEmitter, reason: &str) -> DriverResult<()> {
        warn!(%key, %reason, "Session failed");
        self.controller.fail(key, reason).await?;
        emitter.progress(Status::Error, reason);
        Ok(())
    }

    /// One planner round and its routing
    async fn plan(&self, key: &SessionKey, emitter: &EventEmitter) -> DriverResult<()> {
        debug!(%key, "plan: called");
        let state = self.controller.begin_planning_round(key).await?;
        if state.iteration > state.max_iterations {
            return self
                .fail(key, emitter, &format!("Max iterations ({}) exceeded", state.max_iterations))
                .await;
        }
        let Some(task) = state.current_task.clone() else {
            return self.fail(key, emitter, "Session has no task").await;
        };
        emitter.progress(Status::Planning, format!("Planning: {}", task));

        let page = match self.page.capture().await {
            Ok(page) => page,
            Err(e) => return self.fail(key, emitter, &format!("Page capture failed: {}", e)).await,
        };

        let response = match self
            .planner
            .get_plan_with_confidence(&task, &page.url, &page.elements, &state.conversation_history)
            .await
        {
            Ok(response) => response,
            Err(e) => return self.fail(key, emitter, &format!("Planning failed: {}", e)).await,
        };

        let confidence = response.confidence;
        let mut plan = response.plan;
        plan.score = Some(response.plan_score);
        let state = self.controller.set_plan(key, plan, confidence).await?;
        let plan = state.current_plan.clone().ok_or(DialogueError::NoPlan)?;

        let zone = self.config.router.zone_of(confidence.overall);
        info!(%key, overall = confidence.overall, %zone, "Plan routed");
        emitter.confidence_report(confidence, zone);

        match zone {
            Zone::Ask if !response.clarifying_questions.is_empty() => {
                self.controller
                    .enter_clarifying(key, response.clarifying_questions)
                    .await?;
            }
            Zone::Ask if !response.assumptions.is_empty() => {
                self.controller
                    .enter_assume_announce(key, response.assumptions, plan)
                    .await?;
            }
            Zone::Ask => {
                self.controller
                    .transition_to(key, Status::AwaitingApproval, SessionPatch::default())
                    .await?;
            }
            Zone::AssumeAnnounce => {
                self.controller
                    .enter_assume_announce(key, response.assumptions, plan)
                    .await?;
            }
            Zone::Proceed => self.refine_or_approve(key).await?,
        }
        Ok(())
    }

    /// Send a confident plan to refinement unless it already scores well enough
    async fn refine_or_approve(&self, key: &SessionKey) -> DriverResult<()> {
        let state = self.controller.load(key).await?;
        let score = state.plan_score();
        let next = if score >= self.config.refine_good_enough {
            Status::AwaitingApproval
        } else {
            Status::Refining
        };
        debug!(%key, score, %next, "refine_or_approve: called");
        self.controller.transition_to(key, next, SessionPatch::default()).await?;
        Ok(())
    }

    async fn clarify(&self, key: &SessionKey, state: &SessionState, emitter: &EventEmitter) -> DriverResult<()> {
        debug!(%key, "clarify: called");
        let dialogue = &state.dialogue_state;
        let rx = self.registry.open_prompt(key, PromptKind::Clarification).await?;
        emitter.clarify_needed(
            dialogue.pending_questions.clone(),
            dialogue.clarification_round,
            dialogue.max_clarification_rounds,
        );

        match self.await_prompt(key, PromptKind::Clarification, rx, None, emitter).await {
            PromptResult::Answered(HumanResponse::ClarificationAnswer {
                answer,
                selected_option_id,
            }) => {
                self.controller
                    .replan_with_answer(key, &answer, selected_option_id)
                    .await?;
                Ok(())
            }
            other => Err(unexpected(key, PromptKind::Clarification, other)),
        }
    }

    async fn assume_announce(&self, key: &SessionKey, state: &SessionState, emitter: &EventEmitter) -> DriverResult<()> {
        debug!(%key, "assume_announce: called");
        let plan = state.current_plan.clone().ok_or(DialogueError::NoPlan)?;
        let delay_ms = state.dialogue_state.auto_execute_delay_ms;
        let rx = self.registry.open_prompt(key, PromptKind::AssumeAnnounce).await?;
        emitter.assume_announce(state.dialogue_state.assumptions.clone(), plan, delay_ms);

        let timeout = Some(Duration::from_millis(delay_ms));
        match self.await_prompt(key, PromptKind::AssumeAnnounce, rx, timeout, emitter).await {
            PromptResult::TimedOut => {
                info!(%key, delay_ms, "No correction, proceeding with assumptions");
                self.controller
                    .accept_assumptions(key, self.config.refine_good_enough)
                    .await?;
                Ok(())
            }
            PromptResult::Answered(HumanResponse::AssumptionCorrection { correction }) => {
                self.controller.replan_with_correction(key, &correction).await?;
                Ok(())
            }
            PromptResult::Answered(HumanResponse::AssumptionCancel) => {
                info!(%key, "Task cancelled during assume-announce");
                self.controller.stop(key).await?;
                Ok(())
            }
            other => Err(unexpected(key, PromptKind::AssumeAnnounce, other)),
        }
    }

    async fn refine(&self, key: &SessionKey, state: &SessionState, emitter: &EventEmitter) -> DriverResult<()> {
        debug!(%key, "refine: called");
        emitter.progress(Status::Refining, "Refining plan");
        let plan = state.current_plan.clone().ok_or(DialogueError::NoPlan)?;
        let task = state.current_task.clone().unwrap_or_default();
        let score = state.plan_score();

        match self.page.capture().await {
            Ok(page) => {
                let outcome = SelfRefineLoop::new(self.controller.clone(), self.planner.clone())
                    .with_good_enough(self.config.refine_good_enough)
                    .run(key, plan, score, &page.elements, &task, emitter)
                    .await?;
                if outcome.improved {
                    let mut plan = outcome.plan;
                    plan.score = Some(outcome.score);
                    self.controller.set_plan(key, plan, state.confidence).await?;
                }
            }
            Err(e) => {
                warn!(%key, error = %e, "Page capture failed, skipping refinement");
            }
        }

        self.controller
            .transition_to(key, Status::AwaitingApproval, SessionPatch::default())
            .await?;
        Ok(())
    }

    async fn await_approval(&self, key: &SessionKey, state: &SessionState, emitter: &EventEmitter) -> DriverResult<()> {
        debug!(%key, plan_approved = state.dialogue_state.plan_approved, "await_approval: called");
        if !state.dialogue_state.plan_approved {
            let plan = state.current_plan.clone().ok_or(DialogueError::NoPlan)?;
            let rx = self.registry.open_prompt(key, PromptKind::Approval).await?;
            emitter.plan_ready(plan, state.confidence);

            match self.await_prompt(key, PromptKind::Approval, rx, None, emitter).await {
                PromptResult::Answered(HumanResponse::Approval { approved: true }) => {
                    self.controller.mark_plan_approved(key).await?;
                }
                PromptResult::Answered(HumanResponse::Approval { approved: false }) => {
                    info!(%key, "Plan rejected");
                    self.controller.stop(key).await?;
                    return Ok(());
                }
                other => return Err(unexpected(key, PromptKind::Approval, other)),
            }
        }

        self.controller.start_execution(key).await?;
        emitter.progress(Status::Executing, "Executing plan");
        Ok(())
    }

    async fn execute(&self, key: &SessionKey, emitter: &EventEmitter) -> DriverResult<()> {
        debug!(%key, "execute: called");
        let engine = ExecutionEngine::new(self.controller.clone(), self.page.clone(), self.executor.clone())
            .with_step_delay(self.config.step_delay);
        let mut decisions = PromptedDecisions { inner: self, emitter };

        match engine.run(key, emitter, &mut decisions).await? {
            ExecutionOutcome::Completed { summary } => {
                debug!(%key, %summary, "execute: plan completed");
            }
            ExecutionOutcome::Replan => {
                let state = self.controller.load(key).await?;
                let note = match state.execution_state.failed_steps.last() {
                    Some(failed) => format!("Step {} failed: {}. Replanning.", failed.step_index + 1, failed.error),
                    None => "Replanning at the user's request.".to_string(),
                };
                self.controller.append_note(key, &note).await?;
                emitter.progress(Status::Replanning, note);
            }
            ExecutionOutcome::Aborted => {
                info!(%key, "Execution aborted");
            }
            ExecutionOutcome::Halted { reason } => {
                self.fail(key, emitter, &reason).await?;
            }
        }
        Ok(())
    }

    /// Wait for the answer to an opened prompt, optionally with a deadline
    async fn await_prompt(
        &self,
        key: &SessionKey,
        kind: PromptKind,
        rx: oneshot::Receiver<HumanResponse>,
        timeout: Option<Duration>,
        emitter: &EventEmitter,
    ) -> PromptResult {
        debug!(%key, %kind, ?timeout, "await_prompt: called");
        let mut rx = rx;
        let received = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.registry.close_prompt(key, kind).await {
                        emitter.prompt_closed(kind, PromptCloseReason::TimedOut);
                        return PromptResult::TimedOut;
                    }
                    // an answer was delivered as the deadline passed
                    rx.await
                }
            },
            None => rx.await,
        };

        match received {
            Ok(response) => {
                emitter.prompt_closed(kind, PromptCloseReason::Answered);
                PromptResult::Answered(response)
            }
            Err(_) => PromptResult::Closed,
        }
    }
}

/// Resolves once `stop` has been signalled for the run
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn unexpected(key: &SessionKey, expected: PromptKind, result: PromptResult) -> DriverError {
    match result {
        PromptResult::Answered(response) => DriverError::UnexpectedResponse {
            expected,
            got: response.kind(),
        },
        PromptResult::TimedOut | PromptResult::Closed => DriverError::NotRunning(key.clone()),
    }
}

/// Mid-execution decisions asked of the user through the registry
struct PromptedDecisions<'a> {
    inner: &'a Inner,
    emitter: &'a EventEmitter,
}

#[async_trait]
impl DecisionSource for PromptedDecisions<'_> {
    async fn decide(&mut self, key: &SessionKey, step_index: usize, step: &PlanStep, error: &str) -> MidExecDecision {
        let timeout = self.inner.config.mid_exec_timeout;
        let rx = match self.inner.registry.open_prompt(key, PromptKind::MidExecDecision).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(%key, error = %e, "Cannot prompt for decision, aborting");
                return MidExecDecision::Abort;
            }
        };
        self.emitter
            .mid_exec_dialog(step_index, step.clone(), error, timeout.as_millis() as u64);

        match self
            .inner
            .await_prompt(key, PromptKind::MidExecDecision, rx, Some(timeout), self.emitter)
            .await
        {
            PromptResult::Answered(HumanResponse::MidExecDecision { decision }) => decision,
            PromptResult::TimedOut => {
                info!(%key, step_index, "No decision in time, skipping step");
                MidExecDecision::Skip
            }
            PromptResult::Answered(other) => {
                warn!(%key, kind = %other.kind(), "Unexpected response to decision prompt, skipping step");
                MidExecDecision::Skip
            }
            PromptResult::Closed => MidExecDecision::Abort,
        }
    }
}
