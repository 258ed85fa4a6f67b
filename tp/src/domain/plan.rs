//! Plans, confidence breakdowns and planner-side dialogue payloads

use serde::{Deserialize, Serialize};
use sessionstore::now_ms;
use tracing::debug;

/// Actions that operate on the page as a whole and need no target element
pub const NO_TARGET_ACTIONS: &[&str] = &["scroll", "wait", "navigate", "go_back", "press_key", "screenshot"];

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Action name in the executor's vocabulary (click, type, scroll, ...)
    pub action: String,

    /// Opaque target identifier of the element to act on
    #[serde(default)]
    pub target: Option<String>,

    /// Text to type / option to select
    #[serde(default)]
    pub value: Option<String>,

    /// Human-readable description of the target ("the Submit button")
    #[serde(default)]
    pub description: String,

    /// What the page should look like afterwards
    #[serde(default)]
    pub expected_result: Option<String>,
}

impl PlanStep {
    pub fn new(action: impl Into<String>, target: Option<&str>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: target.map(str::to_string),
            value: None,
            description: description.into(),
            expected_result: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_expected_result(mut self, expected: impl Into<String>) -> Self {
        self.expected_result = Some(expected.into());
        self
    }

    /// Whether this step's action has to name a target element
    pub fn requires_target(&self) -> bool {
        let action = self.action.to_lowercase();
        !NO_TARGET_ACTIONS.contains(&action.as_str())
    }

    /// Whether the step carries a usable target identifier
    pub fn has_concrete_target(&self) -> bool {
        self.target.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// A plan proposed by the planning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Assigned by the dialogue controller when the plan is adopted
    #[serde(default)]
    pub id: String,

    /// 1-based version within the session (history length + 1)
    #[serde(default)]
    pub version: u32,

    pub summary: String,

    #[serde(default)]
    pub steps: Vec<PlanStep>,

    /// Risks the planner already called out
    #[serde(default)]
    pub risks: Vec<String>,

    /// Planner quality score for this plan
    #[serde(default)]
    pub score: Option<f64>,

    /// Creation timestamp (Unix milliseconds)
    #[serde(default)]
    pub created_at: i64,
}

impl Plan {
    pub fn new(summary: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let summary = summary.into();
        debug!(%summary, step_count = steps.len(), "Plan::new: called");
        Self {
            id: String::new(),
            version: 0,
            summary,
            steps,
            risks: Vec::new(),
            score: None,
            created_at: now_ms(),
        }
    }

    pub fn with_risks(mut self, risks: Vec<String>) -> Self {
        self.risks = risks;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Confidence breakdown reported alongside a plan, each value in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Confidence {
    pub overall: f64,
    pub intent_clarity: f64,
    pub target_match: f64,
    pub value_confidence: f64,
}

impl Confidence {
    /// A breakdown where every component equals `overall`
    pub fn uniform(overall: f64) -> Self {
        Self {
            overall,
            intent_clarity: overall,
            target_match: overall,
            value_confidence: overall,
        }
    }
}

/// Something the planner assumed instead of asking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumption {
    pub field: String,
    pub assumed_value: String,
    #[serde(default)]
    pub confidence: f64,
}

impl Assumption {
    pub fn new(field: impl Into<String>, assumed_value: impl Into<String>, confidence: f64) -> Self {
        Self {
            field: field.into(),
            assumed_value: assumed_value.into(),
            confidence,
        }
    }

    /// `field: value` line used when announcing
    pub fn describe(&self) -> String {
        format!("{}: {}", self.field, self.assumed_value)
    }
}

/// A selectable answer offered with a clarifying question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
}

/// A question the planner needs answered before it can plan confidently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyingQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

impl ClarifyingQuestion {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.options.push(QuestionOption {
            id: id.into(),
            label: label.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_target() {
        assert!(PlanStep::new("click", Some("el-1"), "Submit").requires_target());
        assert!(PlanStep::new("type", None, "Email").requires_target());
        assert!(!PlanStep::new("scroll", None, "down").requires_target());
        assert!(!PlanStep::new("Wait", None, "settle").requires_target());
    }

    #[test]
    fn test_blank_target_is_not_concrete() {
        assert!(!PlanStep::new("click", Some("  "), "x").has_concrete_target());
        assert!(!PlanStep::new("click", None, "x").has_concrete_target());
        assert!(PlanStep::new("click", Some("el-3"), "x").has_concrete_target());
    }

    #[test]
    fn test_assumption_describe() {
        let a = Assumption::new("target", "Submit button", 0.7);
        assert_eq!(a.describe(), "target: Submit button");
    }

    #[test]
    fn test_plan_deserializes_with_missing_fields() {
        let json = r#"{"summary": "Log in", "steps": [{"action": "click", "target": "btn"}]}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.summary, "Log in");
        assert_eq!(plan.version, 0);
        assert!(plan.risks.is_empty());
        assert_eq!(plan.steps[0].target.as_deref(), Some("btn"));
        assert!(plan.steps[0].description.is_empty());
    }

    #[test]
    fn test_confidence_camel_case() {
        let json = r#"{"overall": 0.8, "intentClarity": 0.9}"#;
        let c: Confidence = serde_json::from_str(json).unwrap();
        assert_eq!(c.overall, 0.8);
        assert_eq!(c.intent_clarity, 0.9);
        assert_eq!(c.target_match, 0.0);
    }
}
