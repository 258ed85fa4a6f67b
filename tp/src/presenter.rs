//! Terminal rendering of dialogue events and parsing of typed answers

use std::str::FromStr;

use colored::Colorize;
use tracing::debug;

use crate::dialogue::Zone;
use crate::domain::{ClarifyingQuestion, MidExecDecision, Plan};
use crate::driver::HumanResponse;
use crate::events::{DialogueEvent, PromptCloseReason, PromptKind};

/// The prompt a terminal user is currently answering
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPrompt {
    pub kind: PromptKind,
    /// Questions of a clarification prompt, empty otherwise
    pub questions: Vec<ClarifyingQuestion>,
}

impl OpenPrompt {
    /// The prompt an event opens, if it is a prompt event
    pub fn from_event(event: &DialogueEvent) -> Option<Self> {
        let (kind, questions) = match event {
            DialogueEvent::ClarifyNeeded { questions, .. } => (PromptKind::Clarification, questions.clone()),
            DialogueEvent::AssumeAnnounce { .. } => (PromptKind::AssumeAnnounce, Vec::new()),
            DialogueEvent::PlanReady { .. } => (PromptKind::Approval, Vec::new()),
            DialogueEvent::MidExecDialog { .. } => (PromptKind::MidExecDecision, Vec::new()),
            _ => return None,
        };
        Some(Self { kind, questions })
    }

    /// One-line input hint shown under the prompt
    pub fn hint(&self) -> &'static str {
        match self.kind {
            PromptKind::Clarification => "Type an answer or an option id:",
            PromptKind::AssumeAnnounce => "Type a correction, or 'c' to cancel (Enter to let it run):",
            PromptKind::Approval => "Approve plan? [y/n]:",
            PromptKind::MidExecDecision => "[r]etry, [s]kip, re[p]lan or [a]bort:",
        }
    }

    /// Map one typed line to a response for this prompt
    ///
    /// `Ok(None)` means the line is deliberately ignored (Enter during an
    /// assume-announce window).
    pub fn parse(&self, input: &str) -> Result<Option<HumanResponse>, String> {
        debug!(kind = %self.kind, %input, "OpenPrompt::parse: called");
        let input = input.trim();
        match self.kind {
            PromptKind::Approval => match input.to_lowercase().as_str() {
                "" | "y" | "yes" => Ok(Some(HumanResponse::approve())),
                "n" | "no" => Ok(Some(HumanResponse::reject())),
                other => Err(format!("Please answer y or n, not '{}'", other)),
            },
            PromptKind::Clarification => {
                if input.is_empty() {
                    return Err("An answer is required".to_string());
                }
                let option = self
                    .questions
                    .iter()
                    .flat_map(|q| q.options.iter())
                    .find(|o| o.id.eq_ignore_ascii_case(input));
                Ok(Some(match option {
                    Some(option) => HumanResponse::choose(option.label.clone(), option.id.clone()),
                    None => HumanResponse::answer(input),
                }))
            }
            PromptKind::AssumeAnnounce => match input.to_lowercase().as_str() {
                "" => Ok(None),
                "c" | "cancel" => Ok(Some(HumanResponse::AssumptionCancel)),
                _ => Ok(Some(HumanResponse::correct(input))),
            },
            PromptKind::MidExecDecision => MidExecDecision::from_str(input).map(|d| Some(HumanResponse::decide(d))),
        }
    }
}

/// Render an event as terminal lines, or None for events not worth showing
pub fn render(event: &DialogueEvent) -> Option<String> {
    let text = match event {
        DialogueEvent::Progress { message, .. } => format!("{} {}", "·".dimmed(), message),
        DialogueEvent::Complete { result, .. } => format!("{} Task completed: {}", "✓".green(), result),
        DialogueEvent::Error { error, .. } => format!("{} {}", "Error:".red(), error),
        DialogueEvent::Stopped { .. } => format!("{} Session stopped", "■".yellow()),
        DialogueEvent::ConfidenceReport { confidence, zone, .. } => {
            let zone = match zone {
                Zone::Ask => zone.to_string().red(),
                Zone::AssumeAnnounce => zone.to_string().yellow(),
                Zone::Proceed => zone.to_string().green(),
            };
            format!(
                "Confidence {:.2} (intent {:.2}, target {:.2}, value {:.2}) -> {}",
                confidence.overall,
                confidence.intent_clarity,
                confidence.target_match,
                confidence.value_confidence,
                zone
            )
        }
        DialogueEvent::SelfRefineProgress {
            iteration,
            max_iterations,
            score,
            improvements,
            ..
        } => {
            let mut text = format!("Refine {}/{}: score {:.2}", iteration, max_iterations, score);
            for improvement in improvements {
                text.push_str(&format!("\n  + {}", improvement));
            }
            text
        }
        DialogueEvent::ClarifyNeeded {
            questions,
            round,
            max_rounds,
            ..
        } => {
            let mut text = format!("{} (round {}/{})", "Clarification needed".cyan().bold(), round, max_rounds);
            for question in questions {
                text.push_str(&format!("\n  ? {}", question.question));
                for option in &question.options {
                    text.push_str(&format!("\n      [{}] {}", option.id.cyan(), option.label));
                }
            }
            text
        }
        DialogueEvent::AssumeAnnounce {
            assumptions,
            plan,
            auto_execute_delay_ms,
            ..
        } => {
            let mut text = format!(
                "{} (runs in {:.1}s unless corrected)",
                "Proceeding with assumptions".yellow().bold(),
                *auto_execute_delay_ms as f64 / 1000.0
            );
            for assumption in assumptions {
                text.push_str(&format!("\n  ~ {}", assumption.describe()));
            }
            text.push('\n');
            text.push_str(&render_plan(plan));
            text
        }
        DialogueEvent::PlanReady { plan, confidence, .. } => {
            format!(
                "{} (confidence {:.2})\n{}",
                "Plan ready".green().bold(),
                confidence.overall,
                render_plan(plan)
            )
        }
        DialogueEvent::MidExecDialog {
            step_index,
            step,
            error,
            timeout_ms,
            ..
        } => format!(
            "{} Step {} ({} {}) failed: {}\n  skipping in {}s unless you decide",
            "!".red().bold(),
            step_index + 1,
            step.action,
            step.description,
            error,
            timeout_ms / 1000
        ),
        DialogueEvent::PromptClosed { reason, kind, .. } => match reason {
            PromptCloseReason::Answered => return None,
            PromptCloseReason::TimedOut => format!("{} No answer to {} prompt, continuing", "·".dimmed(), kind),
            PromptCloseReason::Stopped => return None,
        },
        DialogueEvent::ActionStarted {
            step_index,
            total_steps,
            step,
            ..
        } => format!("[{}/{}] {} {}", step_index + 1, total_steps, step.action.bold(), step.description),
        DialogueEvent::Action { success, error, .. } => {
            if *success {
                format!("      {}", "ok".green())
            } else {
                format!("      {} {}", "failed".red(), error.as_deref().unwrap_or(""))
            }
        }
    };
    Some(text)
}

/// Numbered step listing of a plan
pub fn render_plan(plan: &Plan) -> String {
    let mut text = format!("  {}", plan.summary.bold());
    for (i, step) in plan.steps.iter().enumerate() {
        text.push_str(&format!("\n  {}. {} {}", i + 1, step.action, step.description));
        if let Some(value) = &step.value {
            text.push_str(&format!(" = {:?}", value));
        }
    }
    for risk in &plan.risks {
        text.push_str(&format!("\n  {} {}", "risk:".yellow(), risk));
    }
    text
}
