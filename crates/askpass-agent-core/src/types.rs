//! Core types for askpass-agent.
//!
//! This module contains the time and outcome types shared by the parser,
//! the admission filter and the answer channel.

use std::time::Duration;

use secrecy::SecretString;

/// A point on the `CLOCK_MONOTONIC` time line, in microseconds.
///
/// This is the clock systemd uses for `NotAfter=` in ask-password files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    /// Create a time from a raw microsecond value.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// The raw microsecond value.
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or `None` if `earlier` is later.
    pub fn checked_duration_since(self, earlier: MonotonicTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(Duration::from_micros)
    }
}

/// Absolute point after which a request is no longer worth serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// `Ask.NotAfter` absent or `0`: the request never expires.
    Never,
    /// The request expires at the given monotonic time.
    At(MonotonicTime),
}

impl Deadline {
    /// Build a deadline from an `Ask.NotAfter` value.
    ///
    /// ```
    /// use askpass_agent_core::types::{Deadline, MonotonicTime};
    ///
    /// assert_eq!(Deadline::from_not_after(0), Deadline::Never);
    /// assert_eq!(
    ///     Deadline::from_not_after(42),
    ///     Deadline::At(MonotonicTime::from_micros(42))
    /// );
    /// ```
    pub fn from_not_after(micros: u64) -> Self {
        if micros == 0 {
            Deadline::Never
        } else {
            Deadline::At(MonotonicTime::from_micros(micros))
        }
    }

    /// Time left before this deadline, as seen at `now`.
    pub fn remaining(&self, now: MonotonicTime) -> Remaining {
        match self {
            Deadline::Never => Remaining::Infinite,
            Deadline::At(at) => match at.checked_duration_since(now) {
                Some(left) if !left.is_zero() => Remaining::Left(left),
                _ => Remaining::Expired,
            },
        }
    }
}

/// Result of comparing a [`Deadline`] against the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    /// No deadline at all.
    Infinite,
    /// The deadline has passed (or is exactly now).
    Expired,
    /// Time left until the deadline.
    Left(Duration),
}

impl Remaining {
    /// Finite time left, `None` when the request never expires.
    ///
    /// Returns `None` for [`Remaining::Expired`] as well; callers check for
    /// expiry first.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Remaining::Left(left) => Some(*left),
            Remaining::Infinite | Remaining::Expired => None,
        }
    }
}

/// The single answer delivered to a requester.
pub enum Outcome {
    /// The user entered a secret.
    Success(SecretString),
    /// The prompt was cancelled, timed out or failed.
    Failure,
}

impl Outcome {
    /// Whether this outcome carries a secret.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

// Manual Debug implementation to avoid exposing the secret
impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success(_) => f.write_str("Success([REDACTED])"),
            Outcome::Failure => f.write_str("Failure"),
        }
    }
}
