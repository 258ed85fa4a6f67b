//! TaskPilot - dialogue-driven browser task orchestration
//!
//! CLI entry point: runs a session against the browser bridge and answers
//! its prompts from the terminal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskpilot::bridge::{ActionExecutor, HttpBridge, PageStateProvider, PlanningService};
use taskpilot::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path};
use taskpilot::config::{Config, load_log_level};
use taskpilot::dialogue::DialogueController;
use taskpilot::domain::{SessionKey, SessionState};
use taskpilot::driver::{DriverConfig, OrchestrationDriver, RunOutcome};
use taskpilot::events::{DialogueEvent, EventBus, read_session_events, spawn_event_logger};
use taskpilot::presenter::{self, OpenPrompt};
use taskpilot::state::SessionStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging is not initialized yet, so nothing here can be traced
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => s.parse::<tracing::Level>().unwrap_or_else(|_| {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(store_dir = %config.storage.store_dir, "TaskPilot loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run { task, session }) => cmd_run(&config, &SessionKey::from(session), Some(&task)).await,
        Some(Command::Resume { session }) => cmd_run(&config, &SessionKey::from(session), None).await,
        Some(Command::Show {
            session,
            format,
            events,
        }) => cmd_show(&config, &SessionKey::from(session), format, events).await,
        Some(Command::Sessions { format }) => cmd_sessions(&config, format).await,
        Some(Command::Stop { session }) => cmd_stop(&config, &SessionKey::from(session)).await,
        Some(Command::Clear { session }) => cmd_clear(&config, &SessionKey::from(session)).await,
        None => {
            let mut cmd = Cli::command().after_help(generate_after_help());
            cmd.print_help()?;
            Ok(())
        }
    }
}

fn events_dir(config: &Config) -> PathBuf {
    Path::new(&config.storage.store_dir).join("events")
}

fn open_store(config: &Config) -> Result<SessionStore> {
    debug!(store_dir = %config.storage.store_dir, "open_store: called");
    SessionStore::spawn(&config.storage.store_dir, config.session_defaults()).context("Failed to open session store")
}

/// Everything a foreground run needs, torn down in order by `shutdown`
struct Runtime {
    store: SessionStore,
    bus: Arc<EventBus>,
    driver: OrchestrationDriver,
    logger: JoinHandle<()>,
}

impl Runtime {
    fn open(config: &Config) -> Result<Self> {
        debug!("Runtime::open: called");
        let store = open_store(config)?;
        let bridge = Arc::new(HttpBridge::from_config(&config.bridge).context("Failed to create browser bridge")?);
        let planner: Arc<dyn PlanningService> = bridge.clone();
        let page: Arc<dyn PageStateProvider> = bridge.clone();
        let executor: Arc<dyn ActionExecutor> = bridge;

        let bus = Arc::new(EventBus::with_default_capacity());
        let logger = spawn_event_logger(bus.clone(), events_dir(config));
        let driver = OrchestrationDriver::new(
            DialogueController::new(store.clone()),
            planner,
            page,
            executor,
            bus.clone(),
            DriverConfig::from_config(config),
        );
        Ok(Self {
            store,
            bus,
            driver,
            logger,
        })
    }

    async fn shutdown(self) {
        debug!("Runtime::shutdown: called");
        drop(self.driver);
        drop(self.bus);
        if tokio::time::timeout(Duration::from_secs(2), self.logger).await.is_err() {
            warn!("Event logger did not finish in time");
        }
        if let Err(e) = self.store.shutdown().await {
            warn!(error = %e, "Session store shutdown failed");
        }
    }
}

async fn cmd_run(config: &Config, key: &SessionKey, task: Option<&str>) -> Result<()> {
    debug!(%key, ?task, "cmd_run: called");
    let runtime = Runtime::open(config)?;
    let events = runtime.driver.subscribe();

    let handle = match task {
        Some(task) => {
            println!("{} {}", "Task:".bold(), task);
            runtime.driver.start(key, task).await?
        }
        None => {
            let state = runtime.driver.controller().load(key).await?;
            println!("{} session {} from {}", "Resuming".bold(), key, state.status);
            runtime.driver.resume(key).await?
        }
    };

    let outcome = interact(&runtime.driver, key, events, handle).await;
    runtime.shutdown().await;
    let outcome = outcome?;

    debug!(?outcome, "cmd_run: session finished");
    match outcome {
        RunOutcome::Completed { .. } | RunOutcome::Idle | RunOutcome::Stopped => Ok(()),
        RunOutcome::Failed { error } => Err(eyre::eyre!("Task failed: {}", error)),
    }
}

/// Render the session's events and feed typed answers to its prompts
async fn interact(
    driver: &OrchestrationDriver,
    key: &SessionKey,
    mut events: broadcast::Receiver<DialogueEvent>,
    mut handle: JoinHandle<RunOutcome>,
) -> Result<RunOutcome> {
    debug!(%key, "interact: called");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut open: Option<OpenPrompt> = None;

    loop {
        tokio::select! {
            // events are drained before the outcome so the final ones still render
            biased;
            received = events.recv() => match received {
                Ok(event) if event.session() == key => {
                    if let Some(text) = presenter::render(&event) {
                        println!("{}", text);
                    }
                    if let Some(prompt) = OpenPrompt::from_event(&event) {
                        println!("{}", prompt.hint().cyan());
                        open = Some(prompt);
                    } else if matches!(event, DialogueEvent::PromptClosed { .. }) {
                        open = None;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "interact: event receiver lagged"),
                Err(RecvError::Closed) => {
                    return handle.await.context("Session task panicked");
                }
            },
            outcome = &mut handle => {
                return outcome.context("Session task panicked");
            }
            line = lines.next_line(), if open.is_some() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!(%key, "stdin closed, stopping session");
                    open = None;
                    driver.stop(key).await?;
                    continue;
                };
                let Some(prompt) = open.clone() else { continue };
                match prompt.parse(&line) {
                    Ok(Some(response)) => match driver.respond(key, response).await {
                        Ok(()) => open = None,
                        Err(e) => println!("{} {}", "Not accepted:".red(), e),
                    },
                    Ok(None) => {}
                    Err(message) => println!("{} {}", message.yellow(), prompt.hint().cyan()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopping session...".yellow());
                open = None;
                driver.stop(key).await?;
            }
        }
    }
}

fn print_state(key: &SessionKey, state: &SessionState) {
    println!("{} {}", "Session:".bold(), key);
    println!("  Status:    {}", state.status);
    if let Some(task) = &state.current_task {
        println!("  Task:      {}", task);
    }
    if let Some(plan) = &state.current_plan {
        println!("  Plan:      v{} {} ({} steps)", plan.version, plan.summary, plan.steps.len());
        println!("  Confidence: {:.2}", state.confidence.overall);
    }
    let exec = &state.execution_state;
    if exec.total_steps > 0 {
        println!(
            "  Progress:  {}/{} completed, {} failed",
            exec.completed_steps.len(),
            exec.total_steps,
            exec.failed_steps.len()
        );
    }
    println!("  Iteration: {}/{}", state.iteration, state.max_iterations);
    if let Some(result) = &state.result {
        println!("  Result:    {}", result.green());
    }
    if let Some(error) = &state.last_error {
        println!("  Error:     {}", error.red());
    }
}

async fn cmd_show(config: &Config, key: &SessionKey, format: OutputFormat, events: bool) -> Result<()> {
    debug!(%key, %format, events, "cmd_show: called");
    let store = open_store(config)?;
    let state = store.load(key).await;
    store.shutdown().await?;
    let state = state?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&state)?),
        OutputFormat::Text => print_state(key, &state),
    }

    if events {
        let entries = read_session_events(events_dir(config), key.as_str())?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&entries)?),
            OutputFormat::Text => {
                println!("\n{} ({})", "Events".bold(), entries.len());
                for entry in &entries {
                    println!("  {} {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.event.event_type());
                }
            }
        }
    }
    Ok(())
}

async fn cmd_sessions(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_sessions: called");
    let store = open_store(config)?;
    let sessions = store.list().await;
    store.shutdown().await?;
    let sessions = sessions?;

    match format {
        OutputFormat::Json | OutputFormat::Yaml => {
            let rows: Vec<serde_json::Value> = sessions
                .iter()
                .map(|(key, status)| serde_json::json!({ "session": key, "status": status }))
                .collect();
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", serde_yaml::to_string(&rows)?);
            }
        }
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions");
            }
            for (key, status) in &sessions {
                println!("{:<24} {}", key, status);
            }
        }
    }
    Ok(())
}

async fn cmd_stop(config: &Config, key: &SessionKey) -> Result<()> {
    debug!(%key, "cmd_stop: called");
    let store = open_store(config)?;
    let result = DialogueController::new(store.clone()).stop(key).await;
    store.shutdown().await?;
    let state = result?;
    println!("{} Session {} is {}", "✓".green(), key, state.status);
    Ok(())
}

async fn cmd_clear(config: &Config, key: &SessionKey) -> Result<()> {
    debug!(%key, "cmd_clear: called");
    let store = open_store(config)?;
    let result = DialogueController::new(store.clone()).clear_session(key).await;
    store.shutdown().await?;
    if result? {
        println!("{} Cleared session {}", "✓".green(), key);
    } else {
        println!("No stored session {}", key);
    }
    Ok(())
}
