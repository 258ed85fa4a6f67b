//! Target re-resolution
//!
//! When the executor cannot find a step's target, the visible elements are
//! scored by word overlap with what the step says it wants and the best
//! match becomes the new target.

use tracing::debug;

use crate::domain::{PageElement, PlanStep};

/// Executor error fragments that mean the target element is gone
const TARGET_MISSING_PATTERNS: &[&str] = &[
    "not found",
    "could not find",
    "cannot find",
    "no element",
    "no such element",
    "unable to locate",
    "does not exist",
    "detached",
];

const TEXT_MATCH_SCORE: u32 = 3;
const HREF_MATCH_SCORE: u32 = 1;
const CONTEXT_MATCH_SCORE: u32 = 1;

/// Shortest word worth matching on
const MIN_WORD_LEN: usize = 3;

/// Whether an executor error says the target element could not be located
pub fn is_target_missing(error: &str) -> bool {
    let error = error.to_lowercase();
    TARGET_MISSING_PATTERNS.iter().any(|p| error.contains(p))
}

/// Lowercased words from the step's description and expected result
fn step_words(step: &PlanStep) -> Vec<String> {
    let mut text = step.description.clone();
    if let Some(expected) = &step.expected_result {
        text.push(' ');
        text.push_str(expected);
    }

    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(str::to_lowercase)
        .collect();
    words.sort();
    words.dedup();
    words
}

/// Overlap score of one element against the step's words
pub fn score_element(words: &[String], element: &PageElement) -> u32 {
    let text = element.text.to_lowercase();
    let href = element.href.as_deref().map(str::to_lowercase).unwrap_or_default();
    let context = element.context.as_ref().map(|c| c.text()).unwrap_or_default();

    words
        .iter()
        .map(|word| {
            let mut score = 0;
            if text.contains(word.as_str()) {
                score += TEXT_MATCH_SCORE;
            }
            if href.contains(word.as_str()) {
                score += HREF_MATCH_SCORE;
            }
            if context.contains(word.as_str()) {
                score += CONTEXT_MATCH_SCORE;
            }
            score
        })
        .sum()
}

fn is_candidate(step: &PlanStep, element: &PageElement) -> bool {
    if element.text.trim().chars().count() < 2 {
        return false;
    }
    if element.context.as_ref().is_some_and(|c| c.is_fixed_navigation()) {
        return false;
    }
    step.target.as_deref() != Some(element.id.as_str())
}

/// Best replacement target for `step`, if any element scores above zero
///
/// Ties go to the element listed first on the page.
pub fn best_candidate<'a>(step: &PlanStep, elements: &'a [PageElement]) -> Option<&'a PageElement> {
    let words = step_words(step);
    debug!(description = %step.description, word_count = words.len(), "best_candidate: called");
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(&PageElement, u32)> = None;
    for element in elements.iter().filter(|e| is_candidate(step, e)) {
        let score = score_element(&words, element);
        if score > 0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((element, score));
        }
    }

    if let Some((element, score)) = best {
        debug!(id = %element.id, score, "best_candidate: picked");
    }
    best.map(|(element, _)| element)
}
