//! Main agent orchestration.
//!
//! The `Agent` owns the directory watch, the scheduler and the receiving end
//! of the UI event channel, and runs them as one single-threaded event loop.
//! Handlers run in arrival order and never overlap.

use std::future::Future;

use anyhow::{Context, Result};
use askpass_agent_core::{RequestFile, UiEvent, UiPort};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::scheduler::Scheduler;
use crate::watch::DirectoryWatch;

/// Reasons the agent stops on its own.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Directory watch stopped")]
    WatchStopped,

    #[error("Prompt backend is unavailable on this platform")]
    PromptUnavailable,
}

/// The askpass agent.
pub struct Agent<U: UiPort> {
    watch: DirectoryWatch,
    scheduler: Scheduler<RequestFile, U>,
    ui_events: mpsc::UnboundedReceiver<UiEvent>,
}

impl<U: UiPort> Agent<U> {
    /// Create an agent.
    ///
    /// `ui_events` must receive the events reported by the scheduler's UI port.
    pub fn new(
        watch: DirectoryWatch,
        scheduler: Scheduler<RequestFile, U>,
        ui_events: mpsc::UnboundedReceiver<UiEvent>,
    ) -> Self {
        Self {
            watch,
            scheduler,
            ui_events,
        }
    }

    /// Run until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        self.run_until(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        })
        .await
    }

    /// Run until `shutdown` completes.
    ///
    /// An active prompt is closed and its request left unanswered. Fails
    /// with [`AgentError`] when the watch ends or the prompt backend turns
    /// out to be unusable.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(path = %self.watch.directory().display(), "Agent running");
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                event = self.watch.recv() => match event {
                    Some(event) => {
                        debug!(?event, "Watch event");
                        self.scheduler.handle_watch_event(event);
                    }
                    None => break Err(AgentError::WatchStopped.into()),
                },
                Some(event) = self.ui_events.recv() => {
                    debug!(?event, "UI event");
                    let unavailable = matches!(event, UiEvent::Unavailable);
                    self.scheduler.handle_ui_event(event);
                    if unavailable {
                        break Err(AgentError::PromptUnavailable.into());
                    }
                }
                _ = &mut shutdown => break Ok(()),
            }
        };

        self.scheduler.shutdown();
        info!(pending = self.scheduler.pending(), "Agent stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::ProcessUi;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::net::UnixDatagram;
    use tokio::sync::oneshot;

    async fn recv_answer(socket: &UnixDatagram) -> Vec<u8> {
        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(10), socket.recv(&mut buf))
            .await
            .expect("timed out waiting for answer")
            .unwrap();
        buf[..n].to_vec()
    }

    fn write_request(dir: &std::path::Path, name: &str, socket: &std::path::Path) {
        // Written under a temporary name and renamed, the way systemd does it
        let tmp = dir.join(format!(".tmp.{}", name));
        std::fs::write(
            &tmp,
            format!(
                "[Ask]\nPID={}\nSocket={}\nNotAfter=0\nMessage={}\n",
                std::process::id(),
                socket.display(),
                name
            ),
        )
        .unwrap();
        std::fs::rename(&tmp, dir.join(format!("ask.{}", name))).unwrap();
    }

    fn agent(dir: &std::path::Path, script: &str) -> Agent<ProcessUi> {
        let (tx, rx) = mpsc::unbounded_channel();
        let args = vec!["-c".to_string(), script.to_string(), "prompt".to_string()];
        let ui = ProcessUi::new("sh", args, tx);
        let watch = DirectoryWatch::start(dir).unwrap();
        Agent::new(watch, Scheduler::new(ui), rx)
    }

    #[tokio::test]
    async fn answers_existing_and_new_requests() {
        let requests = tempdir().unwrap();
        let sockets = tempdir().unwrap();

        let first_socket = sockets.path().join("sck.first");
        let first = UnixDatagram::bind(&first_socket).unwrap();
        write_request(requests.path(), "first", &first_socket);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let agent = agent(requests.path(), "printf '%s-secret\\n' \"$1\"");
        let task = tokio::spawn(agent.run_until(async move {
            let _ = stop_rx.await;
        }));

        assert_eq!(recv_answer(&first).await, b"+first-secret");

        let second_socket = sockets.path().join("sck.second");
        let second = UnixDatagram::bind(&second_socket).unwrap();
        write_request(requests.path(), "second", &second_socket);
        assert_eq!(recv_answer(&second).await, b"+second-secret");

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_prompt_answers_failure() {
        let requests = tempdir().unwrap();
        let sockets = tempdir().unwrap();
        let socket_path = sockets.path().join("sck.c");
        let socket = UnixDatagram::bind(&socket_path).unwrap();
        write_request(requests.path(), "c", &socket_path);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(agent(requests.path(), "exit 1").run_until(async move {
            let _ = stop_rx.await;
        }));

        assert_eq!(recv_answer(&socket).await, b"-");
        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unavailable_prompt_stops_without_answering() {
        let requests = tempdir().unwrap();
        let sockets = tempdir().unwrap();
        let socket_path = sockets.path().join("sck.u");
        let socket = UnixDatagram::bind(&socket_path).unwrap();
        write_request(requests.path(), "u", &socket_path);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            agent(requests.path(), "exit 254").run_until(std::future::pending()),
        )
        .await
        .expect("agent kept running");

        let error = result.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<AgentError>(),
            Some(AgentError::PromptUnavailable)
        ));
        let mut buf = [0u8; 16];
        assert!(socket.try_recv(&mut buf).is_err());
    }

    #[tokio::test]
    async fn shutdown_leaves_active_request_unanswered() {
        let requests = tempdir().unwrap();
        let sockets = tempdir().unwrap();
        let socket_path = sockets.path().join("sck.s");
        let socket = UnixDatagram::bind(&socket_path).unwrap();
        write_request(requests.path(), "s", &socket_path);

        let agent = agent(requests.path(), "exec sleep 30");
        agent
            .run_until(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        assert!(socket.try_recv(&mut buf).is_err());
    }
}
