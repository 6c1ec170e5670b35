//! Process exit statuses shared by the agent and the direct-caller prompt.

/// Exit status of an askpass process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// A secret was delivered.
    Success = 0,
    /// The user cancelled the prompt.
    Cancelled = 1,
    /// `XDG_RUNTIME_DIR` is unset, so there is no directory to watch.
    RuntimeDirectoryUnset = 253,
    /// No usable prompt backend (no terminal, no prompt program).
    InvalidPlatform = 254,
    /// Anything else.
    Unknown = 255,
}

impl ExitStatus {
    /// The numeric status code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Cancelled => write!(f, "cancelled"),
            ExitStatus::RuntimeDirectoryUnset => write!(f, "runtime_directory_unset"),
            ExitStatus::InvalidPlatform => write!(f, "invalid_platform"),
            ExitStatus::Unknown => write!(f, "unknown"),
        }
    }
}
