//! The request scheduler.
//!
//! The scheduler owns the pending request store and at most one active
//! request. It is a plain state machine: the agent feeds it watch and UI
//! events in arrival order and it drives the [`UiPort`].
//!
//! A prompt is only spawned on [`WatchEvent::Settled`] or right after the
//! previous window closed, never in the middle of a burst of directory
//! events.

use askpass_agent_core::{
    Admission, Admitted, Clock, Outcome, ProcessProbe, RequestContext, RequestSource,
    RequestStore, SignalProbe, SystemClock, TimeoutHandle, TimerId, UiEvent, UiPort, WatchEvent,
    WindowResult,
};
use tracing::{debug, error, info, warn};

/// The request currently on screen.
struct RunContext {
    context: RequestContext,
    timer: Option<(TimerId, TimeoutHandle)>,
}

/// Serializes requests into one prompt at a time.
pub struct Scheduler<F, U, C = SystemClock, P = SignalProbe> {
    store: RequestStore<F>,
    admission: Admission<C, P>,
    ui: U,
    run: Option<RunContext>,
    next_timer: u64,
}

impl<F: RequestSource, U: UiPort> Scheduler<F, U> {
    /// Create a scheduler using the system clock and `kill(pid, 0)`.
    pub fn new(ui: U) -> Self {
        Self::with_admission(ui, Admission::default())
    }
}

impl<F: RequestSource, U: UiPort, C: Clock, P: ProcessProbe> Scheduler<F, U, C, P> {
    pub fn with_admission(ui: U, admission: Admission<C, P>) -> Self {
        Self {
            store: RequestStore::new(),
            admission,
            ui,
            run: None,
            next_timer: 0,
        }
    }

    /// Whether a prompt window is on screen.
    pub fn is_prompting(&self) -> bool {
        self.run.is_some()
    }

    /// Number of discovered requests not yet served.
    pub fn pending(&self) -> usize {
        self.store.len()
    }

    /// The request currently on screen.
    pub fn active(&self) -> Option<&RequestContext> {
        self.run.as_ref().map(|run| &run.context)
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn handle_watch_event(&mut self, event: WatchEvent<F>) {
        match event {
            WatchEvent::Created(file) => {
                debug!(request = ?file, "Discovered askpass request");
                self.store.add(file);
            }
            WatchEvent::Deleted(file) => {
                if self.store.remove(&file) {
                    debug!(request = ?file, "Askpass request withdrawn");
                }
            }
            WatchEvent::Settled => self.check_spawn(),
        }
    }

    pub fn handle_ui_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::TimedOut(id) => self.on_timeout(id),
            UiEvent::WindowClosed(result) => self.on_window_closed(result),
            UiEvent::Unavailable => {
                error!("Prompt backend unavailable");
                self.shutdown();
            }
        }
    }

    /// Show the next servable request, unless a prompt is already up.
    pub fn check_spawn(&mut self) {
        if self.run.is_some() {
            return;
        }
        let Some(Admitted { context, remaining }) = self.admission.next_servable(&mut self.store)
        else {
            return;
        };

        info!(
            pid = context.pid(),
            id = context.id(),
            pending = self.store.len(),
            "Prompting for askpass request"
        );
        self.ui.spawn_window(&context);

        let timer = remaining.map(|after| {
            let id = self.next_timer_id();
            debug!(timer = %id, after_ms = after.as_millis() as u64, "Armed prompt timeout");
            (id, self.ui.set_timeout(id, after))
        });
        self.run = Some(RunContext { context, timer });
    }

    /// Close any open window and drop the active request without answering.
    pub fn shutdown(&mut self) {
        if let Some(run) = self.run.take() {
            info!(pid = run.context.pid(), "Abandoning active askpass request");
            self.ui.close_window();
        }
    }

    fn on_timeout(&mut self, id: TimerId) {
        let live = self
            .run
            .as_ref()
            .and_then(|run| run.timer.as_ref())
            .is_some_and(|(timer, _)| *timer == id);
        if !live {
            debug!(timer = %id, "Ignoring stale prompt timeout");
            return;
        }
        info!(timer = %id, "Askpass request timed out, closing prompt");
        self.ui.close_window();
    }

    fn on_window_closed(&mut self, result: WindowResult) {
        debug_assert!(
            self.run.is_some(),
            "window closed while no request was active"
        );
        let Some(run) = self.run.take() else {
            error!(?result, "Prompt window closed while no request was active");
            return;
        };
        if let Some((_, handle)) = run.timer {
            handle.cancel();
        }

        let pid = run.context.pid();
        let outcome = match result {
            WindowResult::Succeeded(secret) => Outcome::Success(secret),
            WindowResult::Cancelled => Outcome::Failure,
        };
        let success = outcome.is_success();
        match run.context.answer(outcome) {
            Ok(()) => info!(pid, success, "Answered askpass request"),
            Err(e) => warn!(pid, error = %e, "Failed to deliver askpass answer"),
        }

        self.check_spawn();
    }

    fn next_timer_id(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }
}
