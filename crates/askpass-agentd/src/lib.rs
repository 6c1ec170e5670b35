//! Askpass agent implementation.
//!
//! This crate provides the agent daemon for askpass-agent: the scheduler
//! that serializes ask-password requests into one prompt at a time, the
//! directory watch feeding it, and the UI ports that show the prompts.

pub mod agent;
pub mod scheduler;
pub mod ui;
pub mod watch;

// Re-export main components
pub use agent::{Agent, AgentError};
pub use scheduler::Scheduler;
pub use ui::{MockUi, ProcessUi};
pub use watch::{DirectoryWatch, WatchError};
