//! TutorBus - language-routed teaching assistants
//!
//! CLI entry point for the chat console and one-shot questions.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use tutorbus::bus::InMemoryBus;
use tutorbus::cli::{Cli, Command};
use tutorbus::config::Config;
use tutorbus::console::{ChatConsole, render_outcome, render_route};
use tutorbus::correlation::ReplyOutcome;
use tutorbus::llm::select_engine;
use tutorbus::router::Router;
use tutorbus::system::{DEFAULT_USER, TeachingSystem};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tutorbus")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("tutorbus.log")).context("Failed to create log file")?;

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
    let cli = Cli::parse();

    // Load log level early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(preferred = %config.llm.preferred, "TutorBus loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Chat { user }) => cmd_chat(config, &user).await,
        Some(Command::Ask { question, user, timeout }) => cmd_ask(config, &question, &user, timeout).await,
        Some(Command::Route { text }) => cmd_route(&config, &text),
        Some(Command::Config) => cmd_config(&config),
        None => {
            debug!("main: no command specified, launching chat");
            cmd_chat(config, DEFAULT_USER).await
        }
    }
}

/// Validate config, pick an engine and start the full system
async fn start_system(config: Config) -> Result<Arc<TeachingSystem>> {
    debug!("start_system: called");
    let report = config.validate();
    for warning in &report.warnings {
        eprintln!("{} {}", "warning:".yellow(), warning);
    }
    if !report.is_valid() {
        for error in &report.errors {
            eprintln!("{} {}", "error:".red(), error);
        }
        eyre::bail!("Invalid configuration ({} errors)", report.errors.len());
    }

    let llm = select_engine(&config.llm).await.context("Failed to select answer engine")?;
    eprintln!("{} Using {} engine", "✓".green(), llm.name().cyan());

    let bus = Arc::new(InMemoryBus::new());
    let system = Arc::new(TeachingSystem::new(config, bus));
    system.register_teachers(llm)?;
    system.start().await.context("Failed to start teaching system")?;
    eprintln!("{} All services started", "✓".green());
    Ok(system)
}

async fn shutdown_system(system: &TeachingSystem) {
    debug!("shutdown_system: called");
    let stats = system.cost_stats();
    system.shutdown().await;
    if !stats.is_empty() {
        println!("{}", stats.render_summary());
    }
}

async fn cmd_chat(config: Config, user: &str) -> Result<()> {
    debug!(%user, "cmd_chat: called");
    let system = start_system(config).await?;

    let mut console = ChatConsole::new(system.clone(), user);
    let result = console.run().await;

    println!("{}", "Shutting down...".yellow());
    shutdown_system(&system).await;
    println!("Goodbye!");
    result
}

async fn cmd_ask(config: Config, question: &str, user: &str, timeout: Option<u64>) -> Result<()> {
    debug!(%question, %user, ?timeout, "cmd_ask: called");
    let system = start_system(config).await?;
    let timeout = timeout.map(Duration::from_secs);

    let outcome = tokio::select! {
        outcome = system.ask(question, user, timeout) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted while waiting for reply");
            ReplyOutcome::Cancelled
        }
    };
    println!("{}", render_outcome(&outcome));
    shutdown_system(&system).await;

    match outcome {
        ReplyOutcome::Answered(reply) if reply.success => Ok(()),
        ReplyOutcome::Answered(_) => eyre::bail!("Question failed"),
        ReplyOutcome::TimedOut { waited } => eyre::bail!("No answer within {}s", waited.as_secs()),
        ReplyOutcome::Cancelled => eyre::bail!("Cancelled"),
        ReplyOutcome::SendFailed { error } => eyre::bail!("Send failed: {}", error),
    }
}

fn cmd_route(config: &Config, text: &str) -> Result<()> {
    debug!(%text, "cmd_route: called");
    let router = Router::from_config(&config.topics, &config.router);
    println!("{}", render_route(&router.route(text)));
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    let report = config.validate();
    for warning in &report.warnings {
        eprintln!("{} {}", "warning:".yellow(), warning);
    }
    for error in &report.errors {
        eprintln!("{} {}", "error:".red(), error);
    }
    Ok(())
}
