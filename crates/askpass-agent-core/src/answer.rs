//! Answer delivery back to the requester.
//!
//! Two channel flavours exist:
//!
//! - [`AnswerChannel`]: a connected Unix datagram socket, as used by the
//!   systemd ask-password protocol. One datagram carries a tag byte
//!   (`'+'` success, `'-'` failure) followed by the secret on success.
//! - [`StreamAnswer`]: the direct-caller variant. The secret goes verbatim
//!   to standard output, cancellation to standard error, and the result is
//!   an [`ExitStatus`] for the process.
//!
//! Both take `self` by value on send, so a channel can answer at most once.

use std::fmt;
use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::exit::ExitStatus;
use crate::types::Outcome;

/// Tag byte for a successful answer.
pub const TAG_SUCCESS: u8 = b'+';

/// Tag byte for a failed or cancelled answer.
pub const TAG_FAILURE: u8 = b'-';

/// Message written to standard error when the direct caller cancels.
pub const CANCELLED_MESSAGE: &str = "Input cancelled by the user";

/// Errors that can occur while delivering an answer.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Writing the answer failed; the secret is lost.
    #[error("failed to deliver answer: {0}")]
    Delivery(#[source] io::Error),

    /// The peer accepted zero bytes, so the answer can never be flushed.
    #[error("answer channel accepted no data")]
    WriteZero,
}

/// Encode an outcome into the datagram wire format.
///
/// ```
/// use askpass_agent_core::answer::encode;
/// use askpass_agent_core::types::Outcome;
/// use secrecy::SecretString;
///
/// let wire = encode(&Outcome::Success(SecretString::from("hunter2")));
/// assert_eq!(wire.as_slice(), b"+hunter2");
/// assert_eq!(encode(&Outcome::Failure).as_slice(), b"-");
/// ```
pub fn encode(outcome: &Outcome) -> Zeroizing<Vec<u8>> {
    match outcome {
        Outcome::Success(secret) => {
            let secret = secret.expose_secret().as_bytes();
            let mut buf = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
            buf.push(TAG_SUCCESS);
            buf.extend_from_slice(secret);
            buf
        }
        Outcome::Failure => Zeroizing::new(vec![TAG_FAILURE]),
    }
}

/// Push `buf` through `write` until everything is written.
///
/// `Interrupted` and `WouldBlock` are retried; short writes continue with
/// the rest of the buffer. Any other error is returned.
pub fn write_fully<W>(mut write: W, mut buf: &[u8]) -> Result<(), AnswerError>
where
    W: FnMut(&[u8]) -> io::Result<usize>,
{
    while !buf.is_empty() {
        match write(buf) {
            Ok(0) => return Err(AnswerError::WriteZero),
            Ok(n) => buf = &buf[n..],
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) => {}
            Err(e) => return Err(AnswerError::Delivery(e)),
        }
    }
    Ok(())
}

/// A one-shot datagram channel to the requester's answer socket.
pub struct AnswerChannel {
    socket: UnixDatagram,
    path: PathBuf,
}

impl AnswerChannel {
    /// Connect an unbound datagram socket to `path`.
    pub fn connect(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let socket = UnixDatagram::unbound()?;
        socket.connect(&path)?;
        debug!(path = %path.display(), "Connected answer socket");
        Ok(Self { socket, path })
    }

    /// Path of the answer socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send the answer and close the channel.
    pub fn send(self, outcome: Outcome) -> Result<(), AnswerError> {
        let datagram = encode(&outcome);
        write_fully(|buf| self.socket.send(buf), &datagram)?;
        debug!(
            path = %self.path.display(),
            success = outcome.is_success(),
            "Answer sent"
        );
        Ok(())
    }
}

impl fmt::Debug for AnswerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerChannel")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Stream answer for the direct-caller variant.
///
/// `out` receives the raw secret, `err` the cancellation diagnostic.
pub struct StreamAnswer<O: Write, E: Write> {
    out: O,
    err: E,
}

impl<O: Write, E: Write> StreamAnswer<O, E> {
    /// Create a stream answer over the given writers.
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    /// Deliver the outcome and return the exit status for the process.
    pub fn send(mut self, outcome: Outcome) -> Result<ExitStatus, AnswerError> {
        match outcome {
            Outcome::Success(secret) => {
                let out = &mut self.out;
                write_fully(|buf| out.write(buf), secret.expose_secret().as_bytes())?;
                self.out.flush().map_err(AnswerError::Delivery)?;
                Ok(ExitStatus::Success)
            }
            Outcome::Failure => {
                writeln!(self.err, "{}", CANCELLED_MESSAGE).map_err(AnswerError::Delivery)?;
                Ok(ExitStatus::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tempfile::tempdir;

    fn bound_socket(dir: &Path) -> (UnixDatagram, PathBuf) {
        let path = dir.join("answer.sock");
        let socket = UnixDatagram::bind(&path).unwrap();
        (socket, path)
    }

    #[test]
    fn success_datagram_carries_tag_and_secret() {
        let dir = tempdir().unwrap();
        let (receiver, path) = bound_socket(dir.path());

        let channel = AnswerChannel::connect(&path).unwrap();
        assert_eq!(channel.path(), path.as_path());
        channel
            .send(Outcome::Success(SecretString::from("hunter2")))
            .unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"+hunter2");
    }

    #[test]
    fn failure_datagram_is_single_tag_byte() {
        let dir = tempdir().unwrap();
        let (receiver, path) = bound_socket(dir.path());

        AnswerChannel::connect(&path)
            .unwrap()
            .send(Outcome::Failure)
            .unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"-");
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let dir = tempdir().unwrap();
        let result = AnswerChannel::connect(dir.path().join("missing.sock"));
        assert!(result.is_err());
    }

    #[test]
    fn send_after_receiver_is_gone_reports_delivery_error() {
        let dir = tempdir().unwrap();
        let (receiver, path) = bound_socket(dir.path());
        let channel = AnswerChannel::connect(&path).unwrap();
        drop(receiver);
        std::fs::remove_file(&path).unwrap();

        let result = channel.send(Outcome::Failure);
        assert!(matches!(result, Err(AnswerError::Delivery(_))));
    }

    #[test]
    fn write_fully_retries_short_and_interrupted_writes() {
        let mut written = Vec::new();
        let mut calls = 0;
        write_fully(
            |buf| {
                calls += 1;
                if calls == 1 {
                    return Err(io::Error::from(io::ErrorKind::Interrupted));
                }
                let n = buf.len().min(3);
                written.extend_from_slice(&buf[..n]);
                Ok(n)
            },
            b"+correct horse",
        )
        .unwrap();
        assert_eq!(written, b"+correct horse");
        assert!(calls > 2);
    }

    #[test]
    fn write_fully_surfaces_hard_errors() {
        let result = write_fully(
            |_| Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            b"-",
        );
        assert!(matches!(result, Err(AnswerError::Delivery(_))));

        let result = write_fully(|_| Ok(0), b"-");
        assert!(matches!(result, Err(AnswerError::WriteZero)));
    }

    #[test]
    fn stream_answer_writes_secret_verbatim() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = StreamAnswer::new(&mut out, &mut err)
            .send(Outcome::Success(SecretString::from("p4ss word")))
            .unwrap();

        assert_eq!(status, ExitStatus::Success);
        assert_eq!(out, b"p4ss word");
        assert!(err.is_empty());
    }

    #[test]
    fn stream_answer_reports_cancellation() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = StreamAnswer::new(&mut out, &mut err)
            .send(Outcome::Failure)
            .unwrap();

        assert_eq!(status, ExitStatus::Cancelled);
        assert!(out.is_empty());
        assert_eq!(
            String::from_utf8(err).unwrap(),
            format!("{}\n", CANCELLED_MESSAGE)
        );
    }
}
