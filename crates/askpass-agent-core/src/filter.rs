//! Liveness and deadline checks applied when a request is dequeued.
//!
//! Both properties can change between discovery and service, so they are
//! evaluated only when the scheduler is about to show a prompt.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::request::RequestContext;
use crate::store::RequestStore;
use crate::traits::{Clock, ProcessProbe, RequestSource};
use crate::types::{MonotonicTime, Remaining};

/// `CLOCK_MONOTONIC`, the clock `Ask.NotAfter` is expressed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> MonotonicTime {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // Safety: `ts` is a valid, writable timespec.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            // Epoch zero makes every finite deadline look pending
            warn!(error = %std::io::Error::last_os_error(), "clock_gettime(CLOCK_MONOTONIC) failed");
        }
        let micros = (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000;
        MonotonicTime::from_micros(micros)
    }
}

/// Liveness probe delivering signal 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // Safety: signal 0 performs only the existence and permission check.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM means the process exists but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

/// A request that passed every check and may be shown now.
#[derive(Debug)]
pub struct Admitted {
    pub context: RequestContext,
    /// Time left until the deadline; `None` when the request never expires.
    pub remaining: Option<Duration>,
}

/// Picks the next servable request out of a store.
#[derive(Debug, Default)]
pub struct Admission<C = SystemClock, P = SignalProbe> {
    clock: C,
    probe: P,
}

impl<C: Clock, P: ProcessProbe> Admission<C, P> {
    pub fn new(clock: C, probe: P) -> Self {
        Self { clock, probe }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Dequeue until a servable request is found or the store is empty.
    ///
    /// Unparsable, expired and orphaned requests are logged and discarded.
    /// Discarded contexts are dropped without answering.
    pub fn next_servable<F: RequestSource>(
        &self,
        store: &mut RequestStore<F>,
    ) -> Option<Admitted> {
        while let Ok(file) = store.take_one() {
            let context = match file.read_context() {
                Ok(context) => context,
                Err(e) => {
                    warn!(request = ?file, error = %e, "Reading askpass request failed");
                    continue;
                }
            };

            let remaining = match context.deadline().remaining(self.clock.now()) {
                Remaining::Expired => {
                    info!(request = ?file, pid = context.pid(), "Askpass request already timed out");
                    continue;
                }
                remaining => remaining.as_duration(),
            };

            // Probed with or without a deadline
            if !self.probe.is_alive(context.pid()) {
                info!(request = ?file, pid = context.pid(), "Askpass requester already disappeared");
                continue;
            }

            debug!(
                request = ?file,
                pid = context.pid(),
                remaining_ms = remaining.map(|d| d.as_millis() as u64),
                "Admitted askpass request"
            );
            return Some(Admitted { context, remaining });
        }
        None
    }
}
