//! Mock UI port for testing.
//!
//! This module provides a recording implementation of [`UiPort`] that can be
//! used in tests without spawning prompt programs. Events the real UI would
//! report asynchronously are queued and handed out by [`MockUi::take_events`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use askpass_agent_core::{RequestContext, TimeoutHandle, TimerId, UiEvent, UiPort, WindowResult};

/// A window the mock was asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub message: String,
    pub pid: i32,
    pub echo: bool,
    pub silent: bool,
}

#[derive(Debug)]
struct MockTimer {
    id: TimerId,
    after: Duration,
    cancelled: Arc<AtomicBool>,
}

/// A mock UI port for testing.
///
/// # Example
///
/// ```
/// use askpass_agentd::ui::MockUi;
///
/// let ui = MockUi::new();
/// assert!(!ui.is_open());
/// assert!(ui.spawned().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MockUi {
    open: bool,
    spawned: Vec<SpawnRecord>,
    close_calls: usize,
    timers: Vec<MockTimer>,
    events: VecDeque<UiEvent>,
}

impl MockUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a window is currently shown.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Every window spawned so far, oldest first.
    pub fn spawned(&self) -> &[SpawnRecord] {
        &self.spawned
    }

    /// Number of `close_window` calls.
    pub fn close_calls(&self) -> usize {
        self.close_calls
    }

    /// Every armed timeout, oldest first.
    pub fn timeouts(&self) -> Vec<(TimerId, Duration)> {
        self.timers.iter().map(|t| (t.id, t.after)).collect()
    }

    /// The most recently armed timer.
    pub fn last_timer(&self) -> Option<TimerId> {
        self.timers.last().map(|t| t.id)
    }

    /// Whether the handle for `id` was cancelled or dropped.
    pub fn is_timer_cancelled(&self, id: TimerId) -> bool {
        self.timers
            .iter()
            .any(|t| t.id == id && t.cancelled.load(Ordering::SeqCst))
    }

    /// Simulate the user finishing the open window.
    pub fn respond(&mut self, result: WindowResult) {
        assert!(self.open, "respond called without an open window");
        self.open = false;
        self.events.push_back(UiEvent::WindowClosed(result));
    }

    /// Simulate the timer `id` firing.
    pub fn fire_timeout(&mut self, id: TimerId) {
        self.events.push_back(UiEvent::TimedOut(id));
    }

    /// Drain the events the port reported since the last call.
    pub fn take_events(&mut self) -> Vec<UiEvent> {
        self.events.drain(..).collect()
    }
}

impl UiPort for MockUi {
    fn spawn_window(&mut self, request: &RequestContext) {
        assert!(!self.open, "spawn_window called while a window is open");
        self.open = true;
        self.spawned.push(SpawnRecord {
            message: request.message().to_string(),
            pid: request.pid(),
            echo: request.echo(),
            silent: request.silent(),
        });
    }

    fn close_window(&mut self) {
        self.close_calls += 1;
        if self.open {
            self.open = false;
            self.events
                .push_back(UiEvent::WindowClosed(WindowResult::Cancelled));
        }
    }

    fn set_timeout(&mut self, id: TimerId, after: Duration) -> TimeoutHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.timers.push(MockTimer {
            id,
            after,
            cancelled: Arc::clone(&cancelled),
        });
        TimeoutHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}
