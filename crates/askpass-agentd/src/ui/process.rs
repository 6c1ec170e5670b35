//! UI port backed by an external prompt program.
//!
//! Each window is one child process in the `ssh-askpass` convention: the
//! message is the last argument, the secret comes back on stdout and a
//! non-zero exit status means the user cancelled. Exit status 254 means the
//! program has no usable backend (no terminal, no display) and is reported
//! as [`UiEvent::Unavailable`]. Echo and silent flags are passed through the
//! environment.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use askpass_agent_core::request::{ENV_ECHO, ENV_SILENT};
use askpass_agent_core::{
    ExitStatus, RequestContext, TimeoutHandle, TimerId, UiEvent, UiPort, WindowResult,
};
use secrecy::SecretString;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// How long stdout may stay open after the prompt program exited.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

const UNAVAILABLE_STATUS: i32 = ExitStatus::InvalidPlatform as i32;

struct Window {
    close: Option<oneshot::Sender<()>>,
    open: Arc<AtomicBool>,
}

/// Runs a prompt program per window.
///
/// Must be used from within a tokio runtime.
pub struct ProcessUi {
    program: PathBuf,
    args: Vec<String>,
    events: mpsc::UnboundedSender<UiEvent>,
    window: Option<Window>,
}

impl ProcessUi {
    /// Create a UI port running `program args... <message>` per request.
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        events: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            events,
            window: None,
        }
    }

    fn is_open(&self) -> bool {
        self.window
            .as_ref()
            .is_some_and(|w| w.open.load(Ordering::SeqCst))
    }
}

impl UiPort for ProcessUi {
    fn spawn_window(&mut self, request: &RequestContext) {
        assert!(!self.is_open(), "spawn_window called while a window is open");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(request.message())
            .env(ENV_ECHO, flag(request.echo()))
            .env(ENV_SILENT, flag(request.silent()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        let open = Arc::new(AtomicBool::new(true));
        let (close_tx, close_rx) = oneshot::channel();
        self.window = Some(Window {
            close: Some(close_tx),
            open: Arc::clone(&open),
        });

        match command.spawn() {
            Ok(child) => {
                debug!(
                    program = %self.program.display(),
                    pid = child.id(),
                    "Spawned prompt program"
                );
                tokio::spawn(run_window(child, close_rx, open, self.events.clone()));
            }
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "Failed to spawn prompt program");
                open.store(false, Ordering::SeqCst);
                let _ = self
                    .events
                    .send(UiEvent::WindowClosed(WindowResult::Cancelled));
            }
        }
    }

    fn close_window(&mut self) {
        if let Some(close) = self.window.as_mut().and_then(|w| w.close.take()) {
            debug!("Closing prompt window");
            let _ = close.send(());
        }
    }

    fn set_timeout(&mut self, id: TimerId, after: Duration) -> TimeoutHandle {
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(UiEvent::TimedOut(id));
        });
        TimeoutHandle::new(move || task.abort())
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

async fn run_window(
    mut child: Child,
    mut close_rx: oneshot::Receiver<()>,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<UiEvent>,
) {
    let stdout = child.stdout.take();
    let mut reader = tokio::spawn(async move {
        let mut output = Zeroizing::new(Vec::new());
        if let Some(mut stdout) = stdout {
            stdout.read_to_end(&mut output).await?;
        }
        Ok::<_, io::Error>(output)
    });

    // A dropped sender also closes the window
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut close_rx => None,
    };

    let event = match exited {
        None => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Prompt program already gone");
            }
            let _ = child.wait().await;
            UiEvent::WindowClosed(WindowResult::Cancelled)
        }
        Some(Ok(status)) if status.success() => {
            // A leftover descendant may hold stdout open past the exit
            let output = tokio::select! {
                output = &mut reader => Some(output),
                _ = &mut close_rx => None,
                _ = tokio::time::sleep(OUTPUT_GRACE) => {
                    warn!("Prompt program output still open after exit");
                    None
                }
            };
            let result = match output {
                Some(Ok(Ok(output))) => secret_from_output(&output)
                    .map(WindowResult::Succeeded)
                    .unwrap_or(WindowResult::Cancelled),
                Some(Ok(Err(e))) => {
                    warn!(error = %e, "Failed to read prompt program output");
                    WindowResult::Cancelled
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Prompt output reader failed");
                    WindowResult::Cancelled
                }
                None => WindowResult::Cancelled,
            };
            UiEvent::WindowClosed(result)
        }
        Some(Ok(status)) if status.code() == Some(UNAVAILABLE_STATUS) => {
            error!(status = %status, "Prompt program cannot run on this platform");
            UiEvent::Unavailable
        }
        Some(Ok(status)) => {
            info!(status = %status, "Prompt cancelled");
            UiEvent::WindowClosed(WindowResult::Cancelled)
        }
        Some(Err(e)) => {
            warn!(error = %e, "Failed to wait for prompt program");
            UiEvent::WindowClosed(WindowResult::Cancelled)
        }
    };

    reader.abort();
    open.store(false, Ordering::SeqCst);
    let _ = events.send(event);
}

/// Strip one trailing line ending and take the rest as the secret.
fn secret_from_output(output: &[u8]) -> Option<SecretString> {
    let trimmed = output
        .strip_suffix(b"\r\n")
        .or_else(|| output.strip_suffix(b"\n"))
        .unwrap_or(output);
    match std::str::from_utf8(trimmed) {
        Ok(secret) => Some(SecretString::from(secret)),
        Err(_) => {
            warn!("Prompt program printed invalid UTF-8");
            None
        }
    }
}
