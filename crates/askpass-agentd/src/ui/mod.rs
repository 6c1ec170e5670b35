//! UI port implementations.
//!
//! This module provides implementations of the [`UiPort`] trait:
//!
//! - [`ProcessUi`]: runs an `ssh-askpass`-style prompt program (production)
//! - [`MockUi`]: records calls for testing
//!
//! [`UiPort`]: askpass_agent_core::UiPort

mod mock;
mod process;

pub use mock::{MockUi, SpawnRecord};
pub use process::ProcessUi;
