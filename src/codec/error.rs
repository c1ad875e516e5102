//! Error types for the codec layer.
//!
//! This module provides a structured error taxonomy that distinguishes between
//! framing errors (malformed control lines and payload headers), protocol
//! errors (semantic violations after a line has been classified), and I/O
//! errors raised by the transport.
//!
//! # Error Categories
//!
//! - [`FramingError`]: Wire-level issues in a control line (missing fields, non-numeric byte
//!   counts, subjects that cannot be written).
//! - [`ProtocolError`]: Higher-level violations such as an unparseable greeting or a server `-ERR`.
//! - [`CodecError`]: What the encoder reports: a framing error or an I/O error.
//!
//! The decoder never surfaces [`FramingError`] to its caller: malformed lines
//! are logged and dropped so the stream can continue. The variants remain
//! public because the encoder and subject validation report them.
//! [`ProtocolError`] is raised by the protocol state machine, never by the
//! codec itself.

use std::io;

use thiserror::Error;

/// Framing-level errors occurring while splitting the byte stream into
/// control lines and payloads.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A delivery header carried fewer fields than the operation requires.
    #[error("malformed {op} header: `{line}`")]
    MalformedHeader {
        /// Operation keyword, for example `MSG`.
        op: &'static str,
        /// The offending line with its terminator removed.
        line: String,
    },

    /// A declared byte count was not a non-negative integer.
    #[error("invalid byte count `{value}` in {op} header")]
    InvalidByteCount {
        /// Operation keyword, for example `MSG`.
        op: &'static str,
        /// Raw token found in the byte-count position.
        value: String,
    },

    /// A header block length exceeded the declared total payload length.
    #[error("header length {header} exceeds total length {total}")]
    HeaderOverrun {
        /// Declared header block length.
        header: usize,
        /// Declared total payload length.
        total: usize,
    },

    /// A subject or subscription id was empty or contained whitespace.
    #[error("invalid subject `{subject}`")]
    InvalidSubject {
        /// The rejected subject.
        subject: String,
    },
}

/// Protocol-level errors occurring after a control line has been decoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The server greeting did not carry valid capability JSON.
    #[error("invalid server info: {reason}")]
    InvalidInfo {
        /// Parser diagnostics.
        reason: String,
    },

    /// The server reported an error with `-ERR`.
    #[error("server error: {message}")]
    Server {
        /// Message text with surrounding quotes removed.
        message: String,
    },

    /// The transport closed before the handshake completed.
    #[error("connection closed during {phase}")]
    ClosedDuringHandshake {
        /// Handshake phase that was interrupted.
        phase: &'static str,
    },
}

/// Errors raised while encoding client commands.
///
/// # Examples
///
/// ```
/// use echo_nats::codec::{CodecError, FramingError};
///
/// let err = CodecError::Framing(FramingError::InvalidSubject {
///     subject: "has space".into(),
/// });
/// let io: std::io::Error = err.into();
/// assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    /// Framing layer error.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport layer I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
