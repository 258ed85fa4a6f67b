//! TaskPilot configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::SessionDefaults;

/// Main TaskPilot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dialogue thresholds and timers
    pub dialogue: DialogueConfig,

    /// Plan execution limits
    pub execution: ExecutionConfig,

    /// Session storage location
    pub storage: StorageConfig,

    /// Browser bridge endpoints
    pub bridge: BridgeConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Check thresholds and endpoints before use
    pub fn validate(&self) -> Result<()> {
        let d = &self.dialogue;
        for (name, value) in [
            ("ask-below", d.ask_below),
            ("proceed-at", d.proceed_at),
            ("refine-good-enough", d.refine_good_enough),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(eyre::eyre!("dialogue.{} must be within 0.0..=1.0, got {}", name, value));
            }
        }
        if d.ask_below > d.proceed_at {
            return Err(eyre::eyre!(
                "dialogue.ask-below ({}) must not exceed dialogue.proceed-at ({})",
                d.ask_below,
                d.proceed_at
            ));
        }
        if self.execution.max_iterations == 0 {
            return Err(eyre::eyre!("execution.max-iterations must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskpilot.yml
        let local_config = PathBuf::from(".taskpilot.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskpilot/taskpilot.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskpilot").join("taskpilot.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Limits stamped into every new session
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            max_clarification_rounds: self.dialogue.max_clarification_rounds,
            max_refine_iterations: self.dialogue.max_refine_iterations,
            auto_execute_delay_ms: self.dialogue.auto_execute_delay_ms,
            max_iterations: self.execution.max_iterations,
        }
    }
}

/// Just the log level, read before logging is initialised
///
/// Config loading logs through tracing, so the subscriber has to exist
/// first. This peeks at the same files without logging anything.
pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
    let candidates: Vec<PathBuf> = match config_path {
        Some(path) => vec![path.clone()],
        None => {
            let mut paths = vec![PathBuf::from(".taskpilot.yml")];
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("taskpilot").join("taskpilot.yml"));
            }
            paths
        }
    };

    candidates
        .iter()
        .filter(|p| p.exists())
        .find_map(|p| fs::read_to_string(p).ok())
        .and_then(|content| serde_yaml::from_str::<Config>(&content).ok())
        .and_then(|config| config.log_level)
}

/// Dialogue thresholds and timers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    #[serde(rename = "max-clarification-rounds")]
    pub max_clarification_rounds: u32,

    #[serde(rename = "max-refine-iterations")]
    pub max_refine_iterations: u32,

    /// Correction window before an announced plan runs on its own
    #[serde(rename = "auto-execute-delay-ms")]
    pub auto_execute_delay_ms: u64,

    /// How long a failed step waits for a decision before skipping
    #[serde(rename = "mid-exec-timeout-ms")]
    pub mid_exec_timeout_ms: u64,

    /// Confidence below this asks clarifying questions
    #[serde(rename = "ask-below")]
    pub ask_below: f64,

    /// Confidence at or above this proceeds without announcing assumptions
    #[serde(rename = "proceed-at")]
    pub proceed_at: f64,

    /// Refine score that ends self-refinement early
    #[serde(rename = "refine-good-enough")]
    pub refine_good_enough: f64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_clarification_rounds: 3,
            max_refine_iterations: 3,
            auto_execute_delay_ms: 3000,
            mid_exec_timeout_ms: 30_000,
            ask_below: 0.5,
            proceed_at: 0.9,
            refine_good_enough: 0.9,
        }
    }
}

/// Plan execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ceiling on planner calls plus step attempts per task
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Settle delay between steps
    #[serde(rename = "step-delay-ms")]
    pub step_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            step_delay_ms: 500,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the session database
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/taskpilot on Linux)
        let store_dir = dirs::data_dir()
            .map(|d| d.join("taskpilot"))
            .unwrap_or_else(|| PathBuf::from(".taskpilot"))
            .to_string_lossy()
            .into_owned();

        Self { store_dir }
    }
}

/// Browser bridge endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// GET returns the current PageState
    #[serde(rename = "page-url")]
    pub page_url: String,

    /// POST an Action, returns an ActionResult
    #[serde(rename = "executor-url")]
    pub executor_url: String,

    /// Base URL of the planner; `/plan` and `/refine` are appended
    #[serde(rename = "planner-url")]
    pub planner_url: String,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            page_url: "http://127.0.0.1:7300/page".to_string(),
            executor_url: "http://127.0.0.1:7300/execute".to_string(),
            planner_url: "http://127.0.0.1:7300/planner".to_string(),
            timeout_ms: 60_000,
        }
    }
}
