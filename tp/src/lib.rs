//! TaskPilot - dialogue-driven browser task orchestration
//!
//! TaskPilot turns a natural-language task into an executed sequence of
//! browser actions. Before acting it decides, from the planner's confidence,
//! whether to ask clarifying questions, announce its assumptions, or go
//! straight to refining and approval. During execution a failed step opens
//! a retry / skip / replan / abort dialogue.
//!
//! # Core Concepts
//!
//! - **Persisted State Machine**: Every transition is saved before it
//!   takes effect, so a session resumes exactly where it stopped
//! - **Confidence Zones**: ask below 0.5, assume-and-announce below 0.9,
//!   proceed from 0.9
//! - **Isolated Sessions**: Each session key has its own state and prompts
//!
//! # Modules
//!
//! - [`domain`] - Session state, plans and page payloads
//! - [`state`] - Actor-owned session store
//! - [`dialogue`] - Transitions, confidence routing and self-refinement
//! - [`execution`] - Step-by-step plan execution with target re-resolution
//! - [`driver`] - Runs sessions and routes human responses to prompts
//! - [`bridge`] - Planner, page and executor seams plus their HTTP client
//! - [`events`] - Event bus and per-session JSONL event logs
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//! - [`presenter`] - Terminal rendering of events and answers

pub mod bridge;
pub mod cli;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod driver;
pub mod events;
pub mod execution;
pub mod presenter;
pub mod state;

// Re-export commonly used types
pub use bridge::{ActionExecutor, BridgeError, HttpBridge, PageStateProvider, PlanResponse, PlanningService, RefineResponse};
pub use config::Config;
pub use dialogue::{ConfidenceRouter, DialogueController, DialogueError, RefineOutcome, SelfRefineLoop, Zone};
pub use domain::{
    Action, ActionResult, Assumption, ClarifyingQuestion, Confidence, MidExecDecision, PageElement, PageState, Plan,
    PlanStep, SessionKey, SessionState, Status,
};
pub use driver::{DriverConfig, DriverError, HumanResponse, OrchestrationDriver, RunOutcome};
pub use events::{DialogueEvent, EventBus, EventEmitter, PromptCloseReason, PromptKind};
pub use execution::{DecisionSource, ExecutionEngine, ExecutionOutcome};
pub use state::{SessionStore, StoreError};
