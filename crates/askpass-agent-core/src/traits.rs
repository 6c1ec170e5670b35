//! Trait definitions for pluggable components.
//!
//! These traits define the interfaces for:
//! - Request sources (files in the watched directory, fakes in tests)
//! - The UI port (child prompt process, mock)
//! - Time and process liveness (system clock and `kill(pid, 0)`)
//!
//! Events flowing back into the scheduler are plain enums so the agent can
//! run a single message-passing loop.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use secrecy::SecretString;

use crate::request::{ParseError, RequestContext};
use crate::types::MonotonicTime;

/// A discoverable request that can be turned into a context on demand.
///
/// Parsing is lazy: the scheduler calls [`RequestSource::read_context`] only
/// when it is about to serve the request.
pub trait RequestSource: Clone + Eq + Hash + fmt::Debug {
    /// Read, parse and open the request.
    fn read_context(&self) -> Result<RequestContext, ParseError>;
}

/// Identifier of an armed prompt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Cancellation handle for an armed timeout.
///
/// Cancelling (or dropping) prevents future firings. A firing that is
/// already queued is not retracted; receivers must tolerate it.
pub struct TimeoutHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimeoutHandle {
    /// Create a handle that runs `cancel` once when cancelled or dropped.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Cancel the timeout.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// How a prompt window ended.
pub enum WindowResult {
    /// The user confirmed with this secret.
    Succeeded(SecretString),
    /// The user cancelled, or the window was closed by the agent.
    Cancelled,
}

// Manual Debug implementation to avoid exposing the secret
impl fmt::Debug for WindowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowResult::Succeeded(_) => f.write_str("Succeeded([REDACTED])"),
            WindowResult::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Events produced by a [`UiPort`] implementation.
#[derive(Debug)]
pub enum UiEvent {
    /// The prompt window closed.
    WindowClosed(WindowResult),
    /// An armed timeout fired.
    TimedOut(TimerId),
    /// The backend cannot show windows on this platform. The window that
    /// reported it is gone and no request should be answered for it.
    Unavailable,
}

/// Events produced by the directory watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<F> {
    /// A request entry appeared.
    Created(F),
    /// A request entry disappeared.
    Deleted(F),
    /// A burst of events is over; a prompt may be spawned.
    Settled,
}

/// The user-facing side of the agent.
///
/// Implementations own at most one window at a time. The scheduler never
/// spawns while a window is open, and implementations may assert that.
/// Window-closed and timeout notifications come back as [`UiEvent`]s.
pub trait UiPort {
    /// Show a prompt for `request`.
    fn spawn_window(&mut self, request: &RequestContext);

    /// Close the open window. Its closing is reported as
    /// [`UiEvent::WindowClosed`] with [`WindowResult::Cancelled`].
    fn close_window(&mut self);

    /// Report [`UiEvent::TimedOut`] with `id` after `after` elapses.
    fn set_timeout(&mut self, id: TimerId, after: Duration) -> TimeoutHandle;
}

/// Source of `CLOCK_MONOTONIC` time.
pub trait Clock {
    fn now(&self) -> MonotonicTime;
}

/// Checks whether a process still exists.
pub trait ProcessProbe {
    fn is_alive(&self, pid: i32) -> bool;
}
