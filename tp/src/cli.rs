//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Session key used when `--session` is not given
pub const DEFAULT_SESSION: &str = "cli";

/// TaskPilot - dialogue-driven browser task orchestration
#[derive(Parser)]
#[command(
    name = "tp",
    about = "Plan, confirm and execute browser tasks through a dialogue",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a task and answer its prompts interactively
    Run {
        /// Natural-language task description
        task: String,

        /// Session key
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Continue a session from its persisted status
    Resume {
        /// Session key
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Show the persisted state of a session
    Show {
        /// Session key
        session: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Also print the session's event log
        #[arg(short, long)]
        events: bool,
    },

    /// List stored sessions and their status
    Sessions {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Reset a session to idle
    Stop {
        /// Session key
        session: String,
    },

    /// Delete a session's stored state
    Clear {
        /// Session key
        session: String,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskpilot")
        .join("logs")
        .join("taskpilot.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with file locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    format!(
        "Config is read from --config, ./.taskpilot.yml or ~/.config/taskpilot/taskpilot.yml\n\nLogs are written to: {}\n",
        get_log_path().display()
    )
}

/// Output format for show/sessions commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text, json, or yaml", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}
