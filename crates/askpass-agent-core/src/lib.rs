//! Core types and utilities for askpass-agent.
//!
//! This crate provides the building blocks shared by the agent daemon and the
//! direct-caller prompt. It is intentionally UI-agnostic: prompting happens
//! behind the [`traits::UiPort`] trait.
//!
//! # Modules
//!
//! - [`types`]: Time and outcome types (`Deadline`, `MonotonicTime`, `Outcome`)
//! - [`request`]: Request file parsing (`RequestFields`, `RequestContext`, `RequestFile`)
//! - [`answer`]: Answer delivery (`AnswerChannel`, `StreamAnswer`)
//! - [`store`]: Pending request set (`RequestStore`)
//! - [`filter`]: Deadline and liveness admission (`Admission`)
//! - [`traits`]: Pluggable component traits (`UiPort`, `Clock`, `ProcessProbe`)
//! - [`config`]: TOML configuration
//! - [`exit`]: Process exit statuses
//!
//! # Example
//!
//! ```
//! use askpass_agent_core::request::RequestFields;
//! use askpass_agent_core::types::Deadline;
//!
//! let fields = RequestFields::parse(
//!     "[Ask]\nPID=42\nSocket=/run/sck.1\nMessage=Unlock disk\n",
//! )
//! .unwrap();
//! assert_eq!(fields.message, "Unlock disk");
//! assert_eq!(fields.deadline, Deadline::Never);
//! ```

pub mod answer;
pub mod config;
pub mod exit;
pub mod filter;
pub mod request;
pub mod store;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root for convenience
pub use answer::{AnswerChannel, AnswerError, StreamAnswer};
pub use config::{Config, ConfigError};
pub use exit::ExitStatus;
pub use filter::{Admission, Admitted, SignalProbe, SystemClock};
pub use request::{ParseError, RequestContext, RequestFields, RequestFile};
pub use store::{EmptyStoreError, RequestStore};
pub use traits::{
    Clock, ProcessProbe, RequestSource, TimeoutHandle, TimerId, UiEvent, UiPort, WatchEvent,
    WindowResult,
};
pub use types::{Deadline, MonotonicTime, Outcome, Remaining};
