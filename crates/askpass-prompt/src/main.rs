//! askpass-prompt - Terminal prompt for SSH_ASKPASS/SUDO_ASKPASS/GIT_ASKPASS.
//!
//! Asks for a secret on the controlling terminal and prints it to stdout.
//! It is also the default prompt program of `askpass-agentd`.
//!
//! # Usage
//!
//! ```bash
//! # Set as SSH askpass
//! export SSH_ASKPASS=/path/to/askpass-prompt
//! export SSH_ASKPASS_REQUIRE=prefer
//!
//! # Set as sudo askpass
//! export SUDO_ASKPASS=/path/to/askpass-prompt
//! sudo -A some_command
//! ```
//!
//! All arguments are joined into the prompt message. The secret is written
//! to stdout without a trailing newline.
//!
//! # Exit status
//!
//! - 0: a secret was entered
//! - 1: input was cancelled (Ctrl-C, Escape or Ctrl-D on an empty line)
//! - 254: there is no controlling terminal
//! - 255: any other error

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use askpass_agent_core::request::{DEFAULT_MESSAGE, ENV_ECHO};
use askpass_agent_core::{ExitStatus, Outcome, StreamAnswer};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use secrecy::SecretString;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const TTY_PATH: &str = "/dev/tty";

/// Reserved up front so typing never reallocates the secret.
const LINE_CAPACITY: usize = 512;

/// Build the prompt message from the command-line arguments.
///
/// SSH_ASKPASS and SUDO_ASKPASS pass the prompt as the first argument;
/// anything after it is joined with spaces.
fn prompt_message(args: impl IntoIterator<Item = String>) -> String {
    let message = args.into_iter().collect::<Vec<_>>().join(" ");
    if message.is_empty() {
        DEFAULT_MESSAGE.to_string()
    } else {
        message
    }
}

/// Interpret a `1`/`0` environment flag. Anything but `1` is off.
fn env_flag(value: Option<String>) -> bool {
    value.as_deref().map(str::trim) == Some("1")
}

#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Continue,
    Submit,
    Cancel,
}

/// Apply one key press to the line being entered.
///
/// Ctrl-C and Escape cancel, as does Ctrl-D on an empty line.
fn apply_key(line: &mut String, key: KeyEvent) -> Edit {
    if key.kind != KeyEventKind::Press {
        return Edit::Continue;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => Edit::Cancel,
        KeyCode::Char('d') if ctrl && line.is_empty() => Edit::Cancel,
        KeyCode::Char('u') if ctrl => {
            line.clear();
            Edit::Continue
        }
        KeyCode::Char(c) if !ctrl => {
            line.push(c);
            Edit::Continue
        }
        KeyCode::Backspace => {
            line.pop();
            Edit::Continue
        }
        KeyCode::Enter => Edit::Submit,
        KeyCode::Esc => Edit::Cancel,
        _ => Edit::Continue,
    }
}

/// Collect a line from terminal events. `None` means the user cancelled.
///
/// With `echo` the typed characters are mirrored to `out`.
fn read_line<I, W>(events: I, echo: bool, out: &mut W) -> io::Result<Option<SecretString>>
where
    I: IntoIterator<Item = io::Result<Event>>,
    W: Write,
{
    let mut line = Zeroizing::new(String::with_capacity(LINE_CAPACITY));
    for event in events {
        let Event::Key(key) = event? else {
            continue;
        };

        let before = line.chars().count();
        let edit = apply_key(&mut line, key);
        if echo {
            let after = line.chars().count();
            if after > before {
                if let Some(c) = line.chars().last() {
                    write!(out, "{}", c)?;
                }
            }
            for _ in after..before {
                out.write_all(b"\x08 \x08")?;
            }
        }

        match edit {
            Edit::Continue => out.flush()?,
            Edit::Submit => {
                out.write_all(b"\r\n")?;
                out.flush()?;
                return Ok(Some(SecretString::from(line.as_str())));
            }
            Edit::Cancel => {
                out.write_all(b"\r\n")?;
                out.flush()?;
                return Ok(None);
            }
        }
    }
    Ok(None)
}

/// Raw terminal mode for the lifetime of the guard.
///
/// Signal keys arrive as input, so Ctrl-C is read as a cancel and the
/// terminal is restored on every exit path.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// Ask on the terminal. `None` means the user cancelled.
fn read_secret(mut tty: File, message: &str, echo: bool) -> Result<Option<SecretString>> {
    write!(tty, "{} ", message).context("Failed to write prompt")?;
    tty.flush().context("Failed to write prompt")?;

    let _raw = RawMode::enable().context("Failed to switch terminal to raw mode")?;
    read_line(std::iter::repeat_with(event::read), echo, &mut tty).context("Failed to read input")
}

fn open_tty() -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(TTY_PATH)
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    setup_logging();

    let message = prompt_message(std::env::args().skip(1));
    let echo = env_flag(std::env::var(ENV_ECHO).ok());

    let tty = match open_tty() {
        Ok(tty) => tty,
        Err(e) => {
            error!(path = TTY_PATH, error = %e, "No controlling terminal");
            return ExitStatus::InvalidPlatform.into();
        }
    };

    let outcome = match read_secret(tty, &message, echo) {
        Ok(Some(secret)) => Outcome::Success(secret),
        Ok(None) => {
            debug!("Input ended without a secret");
            Outcome::Failure
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Prompt failed");
            return ExitStatus::Unknown.into();
        }
    };

    // The secret goes out unframed: SSH, sudo and git read stdout verbatim
    let answer = StreamAnswer::new(io::stdout().lock(), io::stderr().lock());
    match answer.send(outcome) {
        Ok(status) => status.into(),
        Err(e) => {
            error!(error = %e, "Failed to write answer");
            ExitStatus::Unknown.into()
        }
    }
}
