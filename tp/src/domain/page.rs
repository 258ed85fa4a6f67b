//! Page snapshots and executor actions

use serde::{Deserialize, Serialize};

/// Layout metadata about where an element sits on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementContext {
    /// Landmark region (main, nav, header, footer, form, ...)
    pub landmark: Option<String>,

    /// Nearest heading or section label
    pub section: Option<String>,

    /// Element is position-fixed (sticky toolbar, cookie banner, ...)
    pub fixed: bool,
}

impl ElementContext {
    /// Sticky navigation chrome that appears on every page
    pub fn is_fixed_navigation(&self) -> bool {
        if !self.fixed {
            return false;
        }
        matches!(
            self.landmark.as_deref().map(str::to_lowercase).as_deref(),
            Some("nav" | "navigation" | "header" | "banner" | "footer" | "contentinfo")
        )
    }

    /// All textual metadata, lowercased, for matching
    pub fn text(&self) -> String {
        [self.landmark.as_deref(), self.section.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// One interactable element in a page snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    /// Opaque target identifier understood by the executor
    pub id: String,

    /// Visible label
    #[serde(default)]
    pub text: String,

    /// Link destination, if the element is a link
    #[serde(default)]
    pub href: Option<String>,

    #[serde(default)]
    pub context: Option<ElementContext>,
}

impl PageElement {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            href: None,
            context: None,
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn with_context(mut self, context: ElementContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Snapshot of the currently interactable page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    #[serde(default)]
    pub elements: Vec<PageElement>,
    /// Capture time (Unix milliseconds)
    #[serde(default)]
    pub timestamp: i64,
}

impl PageState {
    pub fn new(url: impl Into<String>, elements: Vec<PageElement>) -> Self {
        Self {
            url: url.into(),
            elements,
            timestamp: sessionstore::now_ms(),
        }
    }
}

/// One action for the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl From<&crate::domain::PlanStep> for Action {
    fn from(step: &crate::domain::PlanStep) -> Self {
        Self {
            action: step.action.clone(),
            target: step.target.clone(),
            value: step.value.clone(),
        }
    }
}

/// Outcome reported by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// Error text, or a generic message when the executor gave none
    pub fn error_text(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Action failed without an error message".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlanStep;

    #[test]
    fn test_fixed_navigation_requires_both_flags() {
        let nav = ElementContext {
            landmark: Some("NAV".to_string()),
            section: None,
            fixed: true,
        };
        assert!(nav.is_fixed_navigation());

        let scrolling_nav = ElementContext { fixed: false, ..nav.clone() };
        assert!(!scrolling_nav.is_fixed_navigation());

        let fixed_main = ElementContext {
            landmark: Some("main".to_string()),
            section: None,
            fixed: true,
        };
        assert!(!fixed_main.is_fixed_navigation());
    }

    #[test]
    fn test_context_text() {
        let ctx = ElementContext {
            landmark: Some("Form".to_string()),
            section: Some("Checkout Details".to_string()),
            fixed: false,
        };
        assert_eq!(ctx.text(), "form checkout details");
    }

    #[test]
    fn test_action_from_step() {
        let step = PlanStep::new("type", Some("email"), "Email field").with_value("a@b.c");
        let action = Action::from(&step);
        assert_eq!(action.action, "type");
        assert_eq!(action.target.as_deref(), Some("email"));
        assert_eq!(action.value.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_error_text_fallback() {
        assert_eq!(ActionResult::failed("boom").error_text(), "boom");
        let silent = ActionResult {
            success: false,
            error: None,
        };
        assert!(silent.error_text().contains("without an error"));
    }
}
