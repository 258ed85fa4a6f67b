//! Collaborator seams: page capture, action execution and planning
//!
//! The dialogue engine never touches a browser or a model directly. It
//! talks to these three traits, which [`HttpBridge`] implements against a
//! bridge service and the test mocks implement from scripts.

use async_trait::async_trait;

mod error;
mod http;
mod types;

pub use error::BridgeError;
pub use http::HttpBridge;
pub use types::{PlanResponse, RefineResponse};

use crate::domain::{Action, ActionResult, ConversationEntry, PageElement, PageState, Plan};

/// Snapshot of the page the plan acts on
#[async_trait]
pub trait PageStateProvider: Send + Sync {
    async fn capture(&self) -> Result<PageState, BridgeError>;
}

/// Performs one browser action
///
/// A failed action is an `Ok(ActionResult { success: false, .. })`; `Err`
/// is reserved for not reaching the executor at all.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<ActionResult, BridgeError>;
}

/// Produces and refines plans
#[async_trait]
pub trait PlanningService: Send + Sync {
    /// Plan `task` against the page, given the conversation so far
    async fn get_plan_with_confidence(
        &self,
        task: &str,
        url: &str,
        elements: &[PageElement],
        history: &[ConversationEntry],
    ) -> Result<PlanResponse, BridgeError>;

    /// Improve `plan` using critique `feedback`
    async fn refine(
        &self,
        plan: &Plan,
        feedback: &[String],
        elements: &[PageElement],
        task: &str,
    ) -> Result<RefineResponse, BridgeError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::debug;

    use crate::domain::{Assumption, ClarifyingQuestion, Confidence, PlanStep};

    /// Serves scripted pages; the last one repeats forever
    pub struct MockPage {
        pages: Mutex<VecDeque<PageState>>,
        last: Mutex<PageState>,
    }

    impl MockPage {
        pub fn new(pages: Vec<PageState>) -> Self {
            debug!(page_count = pages.len(), "MockPage::new: called");
            let last = pages.last().cloned().unwrap_or_else(|| PageState::new("about:blank", vec![]));
            Self {
                pages: Mutex::new(pages.into()),
                last: Mutex::new(last),
            }
        }

        pub fn single(page: PageState) -> Self {
            Self::new(vec![page])
        }
    }

    #[async_trait]
    impl PageStateProvider for MockPage {
        async fn capture(&self) -> Result<PageState, BridgeError> {
            let next = self.pages.lock().unwrap().pop_front();
            match next {
                Some(page) => {
                    *self.last.lock().unwrap() = page.clone();
                    Ok(page)
                }
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    /// Replays scripted results; succeeds once the script runs out
    #[derive(Default)]
    pub struct MockExecutor {
        results: Mutex<VecDeque<ActionResult>>,
        executed: Mutex<Vec<Action>>,
    }

    impl MockExecutor {
        pub fn new(results: Vec<ActionResult>) -> Self {
            debug!(result_count = results.len(), "MockExecutor::new: called");
            Self {
                results: Mutex::new(results.into()),
                executed: Mutex::new(Vec::new()),
            }
        }

        pub fn succeeding() -> Self {
            Self::default()
        }

        pub fn executed(&self) -> Vec<Action> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for MockExecutor {
        async fn execute(&self, action: &Action) -> Result<ActionResult, BridgeError> {
            self.executed.lock().unwrap().push(action.clone());
            Ok(self.results.lock().unwrap().pop_front().unwrap_or_else(ActionResult::ok))
        }
    }

    /// Replays scripted planner and refine responses
    #[derive(Default)]
    pub struct MockPlanner {
        plans: Mutex<VecDeque<Result<PlanResponse, BridgeError>>>,
        refines: Mutex<VecDeque<Result<RefineResponse, BridgeError>>>,
        plan_calls: AtomicUsize,
        feedback: Mutex<Vec<Vec<String>>>,
        histories: Mutex<Vec<Vec<ConversationEntry>>>,
    }

    impl MockPlanner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_plan(self, response: PlanResponse) -> Self {
            self.plans.lock().unwrap().push_back(Ok(response));
            self
        }

        pub fn with_plan_error(self, error: BridgeError) -> Self {
            self.plans.lock().unwrap().push_back(Err(error));
            self
        }

        pub fn with_refine(self, response: RefineResponse) -> Self {
            self.refines.lock().unwrap().push_back(Ok(response));
            self
        }

        pub fn with_refine_error(self, error: BridgeError) -> Self {
            self.refines.lock().unwrap().push_back(Err(error));
            self
        }

        pub fn plan_calls(&self) -> usize {
            self.plan_calls.load(Ordering::SeqCst)
        }

        pub fn refine_calls(&self) -> usize {
            self.feedback.lock().unwrap().len()
        }

        pub fn feedback(&self) -> Vec<Vec<String>> {
            self.feedback.lock().unwrap().clone()
        }

        pub fn histories(&self) -> Vec<Vec<ConversationEntry>> {
            self.histories.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlanningService for MockPlanner {
        async fn get_plan_with_confidence(
            &self,
            _task: &str,
            _url: &str,
            _elements: &[PageElement],
            history: &[ConversationEntry],
        ) -> Result<PlanResponse, BridgeError> {
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            self.histories.lock().unwrap().push(history.to_vec());
            self.plans
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BridgeError::InvalidResponse("No more mock plans".to_string())))
        }

        async fn refine(
            &self,
            _plan: &Plan,
            feedback: &[String],
            _elements: &[PageElement],
            _task: &str,
        ) -> Result<RefineResponse, BridgeError> {
            self.feedback.lock().unwrap().push(feedback.to_vec());
            self.refines
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BridgeError::InvalidResponse("No more mock refinements".to_string())))
        }
    }

    /// Plan of `n` click steps on elements `el-0..el-n`
    pub fn click_plan(summary: &str, n: usize) -> Plan {
        Plan::new(
            summary,
            (0..n)
                .map(|i| PlanStep::new("click", Some(&format!("el-{i}")), format!("button {i}")))
                .collect(),
        )
    }

    pub fn plan_response(plan: Plan, overall: f64) -> PlanResponse {
        PlanResponse {
            plan,
            confidence: Confidence::uniform(overall),
            assumptions: vec![],
            clarifying_questions: vec![],
            plan_score: overall,
        }
    }

    pub fn plan_response_with(
        plan: Plan,
        overall: f64,
        assumptions: Vec<Assumption>,
        questions: Vec<ClarifyingQuestion>,
    ) -> PlanResponse {
        PlanResponse {
            assumptions,
            clarifying_questions: questions,
            ..plan_response(plan, overall)
        }
    }

    pub fn refine_response(plan: Plan, score: f64) -> RefineResponse {
        RefineResponse {
            plan,
            score,
            improvements: vec![],
        }
    }
}
