//! Planner request and response payloads

use serde::{Deserialize, Serialize};

use crate::domain::{Assumption, ClarifyingQuestion, Confidence, ConversationEntry, PageElement, Plan};

/// Planner answer to a planning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan: Plan,
    pub confidence: Confidence,
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
    #[serde(default)]
    pub clarifying_questions: Vec<ClarifyingQuestion>,
    #[serde(default)]
    pub plan_score: f64,
}

/// Planner answer to a refine request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineResponse {
    pub plan: Plan,
    pub score: f64,
    #[serde(default)]
    pub improvements: Vec<String>,
}

/// Body of `POST {planner}/plan`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlanRequest<'a> {
    pub task: &'a str,
    pub url: &'a str,
    pub elements: &'a [PageElement],
    pub history: &'a [ConversationEntry],
}

/// Body of `POST {planner}/refine`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefineRequest<'a> {
    pub plan: &'a Plan,
    pub feedback: &'a [String],
    pub elements: &'a [PageElement],
    pub task: &'a str,
}
