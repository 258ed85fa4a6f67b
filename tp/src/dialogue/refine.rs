//! SelfRefineLoop - critique-and-refine rounds for a high-confidence plan

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::controller::{DialogueController, DialogueResult};
use crate::bridge::PlanningService;
use crate::domain::{PageElement, Plan, SessionKey};
use crate::events::EventEmitter;

/// Score at which refinement stops early
pub const DEFAULT_GOOD_ENOUGH: f64 = 0.9;

/// Actions that are hard to undo once performed
static RISKY_ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(delete|submit|purchase|send|pay|remove|confirm)\b").unwrap());

/// Result of a refine run
#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    /// Best plan seen, possibly the one passed in
    pub plan: Plan,
    pub score: f64,
    /// Refine calls made during this run
    pub rounds: u32,
    /// Whether `plan` differs from the input
    pub improved: bool,
}

/// Critique notes for the planner's refine call
///
/// Flags an empty plan, target-requiring steps without a concrete target,
/// and irreversible-looking steps the plan's risks do not mention.
pub fn derive_feedback(plan: &Plan) -> Vec<String> {
    debug!(steps = plan.steps.len(), "derive_feedback: called");
    if plan.steps.is_empty() {
        return vec!["Plan has no steps".to_string()];
    }

    let risks: Vec<String> = plan.risks.iter().map(|r| r.to_lowercase()).collect();
    let mut feedback = Vec::new();

    for (i, step) in plan.steps.iter().enumerate() {
        let n = i + 1;
        if step.requires_target() && !step.has_concrete_target() {
            feedback.push(format!(
                "Step {} ({}) has no concrete target element; pick one of the page's element ids",
                n, step.action
            ));
        }

        let haystack = format!("{} {}", step.action, step.description);
        if let Some(m) = RISKY_ACTION_RE.find(&haystack) {
            let keyword = m.as_str().to_lowercase();
            if !risks.iter().any(|r| r.contains(&keyword)) {
                feedback.push(format!(
                    "Step {} looks irreversible ('{}') but no risk is noted for it",
                    n, keyword
                ));
            }
        }
    }

    feedback
}

/// Runs bounded refine rounds against the planner, keeping the best plan
pub struct SelfRefineLoop {
    controller: DialogueController,
    planner: Arc<dyn PlanningService>,
    good_enough: f64,
}

impl SelfRefineLoop {
    pub fn new(controller: DialogueController, planner: Arc<dyn PlanningService>) -> Self {
        Self {
            controller,
            planner,
            good_enough: DEFAULT_GOOD_ENOUGH,
        }
    }

    pub fn with_good_enough(mut self, good_enough: f64) -> Self {
        self.good_enough = good_enough;
        self
    }

    /// Refine `plan` until it scores well enough or the round budget runs out
    ///
    /// Rounds are counted from the session's persisted refine iteration, so
    /// a resumed run only spends what is left. A failed refine call ends the
    /// run and keeps the best plan so far.
    pub async fn run(
        &self,
        key: &SessionKey,
        plan: Plan,
        initial_score: f64,
        elements: &[PageElement],
        task: &str,
        emitter: &EventEmitter,
    ) -> DialogueResult<RefineOutcome> {
        debug!(%key, initial_score, good_enough = self.good_enough, "SelfRefineLoop::run: called");
        let mut outcome = RefineOutcome {
            plan,
            score: initial_score,
            rounds: 0,
            improved: false,
        };

        if initial_score >= self.good_enough {
            debug!(%key, "SelfRefineLoop::run: initial score already good enough");
            return Ok(outcome);
        }

        loop {
            let state = self.controller.load(key).await?;
            let dialogue = &state.dialogue_state;
            if dialogue.refine_iteration >= dialogue.max_refine_iterations {
                debug!(%key, rounds = outcome.rounds, "SelfRefineLoop::run: round budget exhausted");
                break;
            }

            let state = self.controller.enter_refining(key).await?;
            let iteration = state.dialogue_state.refine_iteration;
            let max_iterations = state.dialogue_state.max_refine_iterations;
            let feedback = derive_feedback(&outcome.plan);
            outcome.rounds += 1;

            let response = match self.planner.refine(&outcome.plan, &feedback, elements, task).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(%key, iteration, error = %e, "Refine call failed, keeping best plan");
                    break;
                }
            };

            debug!(%key, iteration, score = response.score, "SelfRefineLoop::run: round scored");
            emitter.self_refine_progress(iteration, max_iterations, response.score, response.improvements);

            let round_score = response.score;
            if round_score > outcome.score {
                outcome.plan = response.plan;
                outcome.score = round_score;
                outcome.improved = true;
            }
            if round_score >= self.good_enough {
                break;
            }
        }

        info!(%key, score = outcome.score, rounds = outcome.rounds, improved = outcome.improved, "Refinement finished");
        Ok(outcome)
    }
}
