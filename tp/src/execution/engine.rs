//! ExecutionEngine - walks the approved plan one step at a time

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::resolve::{best_candidate, is_target_missing};
use crate::bridge::{ActionExecutor, PageStateProvider};
use crate::dialogue::{DialogueController, DialogueError, DialogueResult};
use crate::domain::{Action, ActionResult, MidExecDecision, PlanStep, SessionKey, Status};
use crate::events::EventEmitter;

/// Default settle delay between steps
pub const DEFAULT_STEP_DELAY_MS: u64 = 500;

/// How an execution run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every step ran; the session is `completed`
    Completed { summary: String },
    /// The user asked for a new plan; the session is `replanning`
    Replan,
    /// The user aborted; the session is `idle`
    Aborted,
    /// Execution cannot continue (iteration ceiling, page unavailable)
    Halted { reason: String },
}

/// Supplies the user's decision for a failed step
#[async_trait]
pub trait DecisionSource: Send {
    async fn decide(&mut self, key: &SessionKey, step_index: usize, step: &PlanStep, error: &str) -> MidExecDecision;
}

/// Executes the session's current plan against the page
pub struct ExecutionEngine {
    controller: DialogueController,
    page: Arc<dyn PageStateProvider>,
    executor: Arc<dyn ActionExecutor>,
    step_delay: Duration,
}

impl ExecutionEngine {
    pub fn new(
        controller: DialogueController,
        page: Arc<dyn PageStateProvider>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            controller,
            page,
            executor,
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// Run from the persisted step index until the plan ends or a decision exits
    ///
    /// Also picks up a session left in `mid_exec_dialog` by asking for the
    /// outstanding decision first.
    pub async fn run(
        &self,
        key: &SessionKey,
        emitter: &EventEmitter,
        decisions: &mut dyn DecisionSource,
    ) -> DialogueResult<ExecutionOutcome> {
        debug!(%key, "ExecutionEngine::run: called");
        let mut first_step = true;

        loop {
            let state = self.controller.load(key).await?;
            match state.status {
                Status::Executing | Status::MidExecDialog => {}
                Status::Replanning => return Ok(ExecutionOutcome::Replan),
                Status::Idle => return Ok(ExecutionOutcome::Aborted),
                other => {
                    return Ok(ExecutionOutcome::Halted {
                        reason: format!("Cannot execute from status {}", other),
                    });
                }
            }

            let plan = state.current_plan.as_ref().ok_or(DialogueError::NoPlan)?;
            let index = state.execution_state.current_step_index;

            if state.status == Status::MidExecDialog {
                let failure = state
                    .execution_state
                    .unresolved_failure()
                    .ok_or(DialogueError::NoFailedStep)?;
                let step = plan
                    .steps
                    .get(failure.step_index)
                    .ok_or(DialogueError::StepOutOfRange(failure.step_index))?;
                let decision = decisions.decide(key, failure.step_index, step, &failure.error).await;
                self.controller.record_mid_exec_decision(key, decision).await?;
                continue;
            }

            let total_steps = plan.steps.len();
            let Some(step) = plan.steps.get(index).cloned() else {
                let summary = plan.summary.clone();
                self.controller.complete(key, &summary).await?;
                info!(%key, total_steps, "Plan executed");
                return Ok(ExecutionOutcome::Completed { summary });
            };

            if !first_step && !self.step_delay.is_zero() {
                debug!(%key, delay_ms = self.step_delay.as_millis() as u64, "run: settling before next step");
                tokio::time::sleep(self.step_delay).await;
            }
            first_step = false;

            let page = match self.page.capture().await {
                Ok(page) => page,
                Err(e) => {
                    warn!(%key, error = %e, "Page capture failed before step");
                    return Ok(ExecutionOutcome::Halted {
                        reason: format!("Page capture failed: {}", e),
                    });
                }
            };

            let state = self.controller.begin_step(key, page).await?;
            if state.iteration > state.max_iterations {
                warn!(%key, iteration = state.iteration, max = state.max_iterations, "Iteration ceiling reached");
                return Ok(ExecutionOutcome::Halted {
                    reason: format!("Max iterations ({}) exceeded", state.max_iterations),
                });
            }

            info!(%key, step = index + 1, total_steps, action = %step.action, "Executing step");
            emitter.action_started(index, total_steps, step.clone());

            let (action, result) = self.attempt(key, index, &step).await?;
            emitter.action(index, action.clone(), result.success, result.error.clone());

            if result.success {
                self.controller.record_step_completed(key, &action.action).await?;
            } else {
                self.controller
                    .enter_mid_exec_dialog(key, &step, &result.error_text())
                    .await?;
            }
        }
    }

    /// Execute a step, re-resolving its target once if the element is gone
    async fn attempt(&self, key: &SessionKey, index: usize, step: &PlanStep) -> DialogueResult<(Action, ActionResult)> {
        let action = Action::from(step);
        let result = self.execute(&action).await;
        if result.success || !step.requires_target() || !is_target_missing(&result.error_text()) {
            return Ok((action, result));
        }

        debug!(%key, index, error = %result.error_text(), "attempt: target missing, re-resolving");
        let page = match self.page.capture().await {
            Ok(page) => page,
            Err(e) => {
                warn!(%key, error = %e, "Re-capture for re-resolution failed");
                return Ok((action, result));
            }
        };

        let Some(candidate) = best_candidate(step, &page.elements) else {
            debug!(%key, index, "attempt: no replacement target");
            return Ok((action, result));
        };

        info!(%key, index, from = ?step.target, to = %candidate.id, "Retargeting step");
        self.controller.retarget_step(key, index, &candidate.id).await?;
        let retargeted = Action {
            target: Some(candidate.id.clone()),
            ..action
        };
        let result = self.execute(&retargeted).await;
        Ok((retargeted, result))
    }

    async fn execute(&self, action: &Action) -> ActionResult {
        match self.executor.execute(action).await {
            Ok(result) => result,
            Err(e) => {
                warn!(action = %action.action, error = %e, "Executor unreachable");
                ActionResult::failed(e.to_string())
            }
        }
    }
}
