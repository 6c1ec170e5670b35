//! askpass-agentd - Main entry point.
//!
//! Answers systemd-style password requests. Requesters drop `ask.*` files
//! into `$XDG_RUNTIME_DIR/systemd/ask-password`; the agent shows one prompt
//! at a time through an external prompt program and sends each answer back
//! over the request's datagram socket.
//!
//! # Exit status
//!
//! - 0: stopped by SIGTERM or SIGINT
//! - 253: `XDG_RUNTIME_DIR` is unset and no directory was given
//! - 254: the prompt program cannot be found or cannot run here
//! - 255: any other error

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use askpass_agent_core::config::DEFAULT_PROMPT_PROGRAM;
use askpass_agent_core::{Config, ConfigError, ExitStatus};
use askpass_agentd::{Agent, AgentError, DirectoryWatch, ProcessUi, Scheduler};

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Password agent for systemd ask-password requests.
#[derive(Parser)]
#[command(name = "askpass-agentd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: ~/.config/askpass-agent/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory to watch [default: $XDG_RUNTIME_DIR/systemd/ask-password]
    #[arg(short, long, value_name = "PATH")]
    directory: Option<PathBuf>,

    /// Prompt program to run per request [default: askpass-prompt]
    #[arg(short, long, value_name = "PROGRAM")]
    prompt: Option<String>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn setup_logging(level: &str) {
    // Use RUST_LOG=debug for verbose output, or CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // JOURNAL_STREAM is set when stdout/stderr go to the journal
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Map a fatal error to the process exit status.
fn exit_status(error: &anyhow::Error) -> ExitStatus {
    for cause in error.chain() {
        if let Some(ConfigError::RuntimeDirectoryUnset) = cause.downcast_ref::<ConfigError>() {
            return ExitStatus::RuntimeDirectoryUnset;
        }
        if cause.downcast_ref::<which::Error>().is_some() {
            return ExitStatus::InvalidPlatform;
        }
        if let Some(AgentError::PromptUnavailable) = cause.downcast_ref::<AgentError>() {
            return ExitStatus::InvalidPlatform;
        }
    }
    ExitStatus::Unknown
}

/// The bundled terminal prompt needs a controlling terminal.
fn check_prompt_backend(program: &Path, tty: &Path) -> Result<(), AgentError> {
    if program.file_name() != Some(OsStr::new(DEFAULT_PROMPT_PROGRAM)) {
        return Ok(());
    }
    match OpenOptions::new().read(true).write(true).open(tty) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!(path = %tty.display(), error = %e, "No controlling terminal for the prompt");
            Err(AgentError::PromptUnavailable)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from specified path");
            Config::load_from(path).context("Failed to load configuration")
        }
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            if let Some(path) = Config::default_path() {
                if path.exists() {
                    info!(path = %path.display(), "Loaded configuration");
                } else {
                    debug!("No config file found, using defaults");
                }
            }
            Ok(config)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    let directory = match cli.directory {
        Some(directory) => directory,
        None => config
            .watch_directory()
            .context("Cannot locate ask-password directory")?,
    };

    let program = cli.prompt.unwrap_or(config.prompt.program);
    let program = which::which(&program)
        .with_context(|| format!("Prompt program {:?} not found", program))?;
    info!(program = %program.display(), "Using prompt program");
    check_prompt_backend(&program, Path::new("/dev/tty"))?;

    let watch = DirectoryWatch::start(&directory)
        .with_context(|| format!("Failed to watch {}", directory.display()))?;

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let ui = ProcessUi::new(program, config.prompt.args, ui_tx);
    Agent::new(watch, Scheduler::new(ui), ui_rx).run().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Determine log level from CLI flags
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    setup_logging(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting askpass-agentd"
    );

    match run(cli).await {
        Ok(()) => ExitStatus::Success.into(),
        Err(e) => {
            let status = exit_status(&e);
            error!(error = %format!("{:#}", e), %status, "Agent error");
            status.into()
        }
    }
}
