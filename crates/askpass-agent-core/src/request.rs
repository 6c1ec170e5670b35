//! Request file parsing.
//!
//! Requesters drop one file per pending question into the watched
//! directory. The file is line-oriented `key=value` text; systemd writes it
//! in INI form with an `[Ask]` section, which is equivalent to prefixing
//! every key with `Ask.`:
//!
//! ```text
//! [Ask]
//! PID=4242
//! Socket=/run/systemd/ask-password/sck.1a2b3c
//! NotAfter=0
//! Echo=0
//! Message=Please enter passphrase for disk root:
//! ```
//!
//! Parsing is split in two steps so the text handling stays pure:
//! [`RequestFields::parse`] validates the text, and [`RequestFields::open`]
//! connects the answer socket and yields a [`RequestContext`].

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

use crate::answer::{AnswerChannel, AnswerError};
use crate::traits::RequestSource;
use crate::types::{Deadline, Outcome};

/// Key for the message shown to the user.
pub const KEY_MESSAGE: &str = "Ask.Message";
/// Key for the requester's process ID.
pub const KEY_PID: &str = "Ask.PID";
/// Key for the answer socket path.
pub const KEY_SOCKET: &str = "Ask.Socket";
/// Key for the deadline in `CLOCK_MONOTONIC` microseconds.
pub const KEY_NOT_AFTER: &str = "Ask.NotAfter";
/// Key for whether typed input may be shown.
pub const KEY_ECHO: &str = "Ask.Echo";
/// Key for whether even input length should be hidden.
pub const KEY_SILENT: &str = "Ask.Silent";
/// Key for the requester-chosen request identifier.
pub const KEY_ID: &str = "Ask.Id";
/// Key for the requester-chosen icon name.
pub const KEY_ICON: &str = "Ask.Icon";

/// Message used when the request carries none.
pub const DEFAULT_MESSAGE: &str = "No message";

/// Prefix of request file names inside the watched directory.
pub const REQUEST_FILE_PREFIX: &str = "ask.";

/// Environment variable telling a prompt program to echo input (`1` or `0`).
pub const ENV_ECHO: &str = "ASKPASS_AGENT_ECHO";
/// Environment variable telling a prompt program to hide input length.
pub const ENV_SILENT: &str = "ASKPASS_AGENT_SILENT";

/// Errors that can occur while turning a request file into a context.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The request file could not be read.
    #[error("failed to read request file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A required key is absent.
    #[error("missing required field {0}")]
    MissingRequiredField(&'static str),

    /// A known key carries a value that does not parse.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    /// A known key occurs more than once.
    #[error("field {0} given more than once")]
    DuplicateField(&'static str),

    /// A line that is neither blank, a comment, a section nor `key=value`.
    #[error("malformed line {line}")]
    MalformedLine { line: usize },

    /// The answer socket could not be connected.
    #[error("answer socket {path} unavailable: {source}")]
    ChannelUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Validated request fields, before the answer socket is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFields {
    pub message: String,
    pub pid: i32,
    pub socket: PathBuf,
    pub deadline: Deadline,
    pub echo: bool,
    pub silent: bool,
    pub id: Option<String>,
    pub icon: Option<String>,
}

impl RequestFields {
    /// Parse request file text.
    ///
    /// Unknown keys are ignored so newer requesters keep working.
    ///
    /// ```
    /// use askpass_agent_core::request::RequestFields;
    /// use askpass_agent_core::types::Deadline;
    ///
    /// let fields = RequestFields::parse("Ask.PID=7\nAsk.Socket=/tmp/sck\n").unwrap();
    /// assert_eq!(fields.pid, 7);
    /// assert_eq!(fields.message, "No message");
    /// assert_eq!(fields.deadline, Deadline::Never);
    /// ```
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut section: Option<&str> = None;
        let mut seen: HashSet<&'static str> = HashSet::new();

        let mut message = None;
        let mut pid = None;
        let mut socket = None;
        let mut not_after = None;
        let mut echo = None;
        let mut silent = None;
        let mut id = None;
        let mut icon = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim()).filter(|name| !name.is_empty());
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(ParseError::MalformedLine { line: index + 1 })?;
            let key = key.trim();
            let value = value.trim();
            let full_key = match section {
                Some(section) => format!("{}.{}", section, key),
                None => key.to_string(),
            };

            let Some(known) = known_key(&full_key) else {
                trace!(key = %full_key, "Ignoring unknown request key");
                continue;
            };
            if !seen.insert(known) {
                return Err(ParseError::DuplicateField(known));
            }

            match known {
                KEY_MESSAGE => message = Some(value.to_string()),
                KEY_PID => pid = Some(parse_pid(value)?),
                KEY_SOCKET => socket = Some(parse_socket(value)?),
                KEY_NOT_AFTER => not_after = Some(parse_number(KEY_NOT_AFTER, value)?),
                KEY_ECHO => echo = Some(parse_flag(KEY_ECHO, value)?),
                KEY_SILENT => silent = Some(parse_flag(KEY_SILENT, value)?),
                KEY_ID => id = Some(value.to_string()),
                KEY_ICON => icon = Some(value.to_string()),
                _ => unreachable!("known_key returned an unhandled key"),
            }
        }

        Ok(Self {
            message: message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            pid: pid.ok_or(ParseError::MissingRequiredField(KEY_PID))?,
            socket: socket.ok_or(ParseError::MissingRequiredField(KEY_SOCKET))?,
            deadline: Deadline::from_not_after(not_after.unwrap_or(0)),
            echo: echo.unwrap_or(false),
            silent: silent.unwrap_or(false),
            id,
            icon,
        })
    }

    /// Connect the answer socket and build the request context.
    pub fn open(self) -> Result<RequestContext, ParseError> {
        let answer = AnswerChannel::connect(&self.socket).map_err(|source| {
            ParseError::ChannelUnavailable {
                path: self.socket.clone(),
                source,
            }
        })?;

        Ok(RequestContext {
            message: self.message,
            pid: self.pid,
            deadline: self.deadline,
            echo: self.echo,
            silent: self.silent,
            id: self.id,
            icon: self.icon,
            answer,
        })
    }
}

fn known_key(key: &str) -> Option<&'static str> {
    [
        KEY_MESSAGE,
        KEY_PID,
        KEY_SOCKET,
        KEY_NOT_AFTER,
        KEY_ECHO,
        KEY_SILENT,
        KEY_ID,
        KEY_ICON,
    ]
    .into_iter()
    .find(|known| *known == key)
}

fn invalid(key: &'static str, value: &str) -> ParseError {
    ParseError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

fn parse_pid(value: &str) -> Result<i32, ParseError> {
    match value.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(invalid(KEY_PID, value)),
    }
}

fn parse_socket(value: &str) -> Result<PathBuf, ParseError> {
    if value.is_empty() {
        return Err(invalid(KEY_SOCKET, value));
    }
    Ok(PathBuf::from(value))
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ParseError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ParseError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// A parsed request with its open answer channel.
///
/// The context answers exactly once: [`RequestContext::answer`] consumes it.
/// Dropping a context without answering closes the socket silently.
pub struct RequestContext {
    message: String,
    pid: i32,
    deadline: Deadline,
    echo: bool,
    silent: bool,
    id: Option<String>,
    icon: Option<String>,
    answer: AnswerChannel,
}

impl RequestContext {
    /// Parse request text and open its answer channel in one step.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        RequestFields::parse(text)?.open()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn silent(&self) -> bool {
        self.silent
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    /// Path of the answer socket.
    pub fn answer_path(&self) -> &Path {
        self.answer.path()
    }

    /// Deliver the single answer for this request.
    pub fn answer(self, outcome: Outcome) -> Result<(), AnswerError> {
        self.answer.send(outcome)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("message", &self.message)
            .field("pid", &self.pid)
            .field("deadline", &self.deadline)
            .field("echo", &self.echo)
            .field("silent", &self.silent)
            .field("id", &self.id)
            .field("answer", &self.answer)
            .finish()
    }
}

/// A request file in the watched directory.
///
/// Identity is the path: two handles for the same entry compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFile {
    path: PathBuf,
}

impl RequestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a directory entry name follows the `ask.*` convention.
    pub fn is_request_name(name: &str) -> bool {
        name.starts_with(REQUEST_FILE_PREFIX) && name.len() > REQUEST_FILE_PREFIX.len()
    }
}

impl RequestSource for RequestFile {
    fn read_context(&self) -> Result<RequestContext, ParseError> {
        let text =
            std::fs::read_to_string(&self.path).map_err(|source| ParseError::Unreadable {
                path: self.path.clone(),
                source,
            })?;
        RequestContext::parse(&text)
    }
}

impl fmt::Display for RequestFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
