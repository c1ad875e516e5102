//! Operations exchanged with the broker.

use bytes::Bytes;

use super::ConnectInfo;
use crate::codec::FramingError;

/// A decoded message received from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerOp {
    /// `INFO {json}` capability announcement. The JSON body is kept raw so the
    /// state machine can report parse failures against the handshake.
    Info(String),
    /// `+OK` acknowledgement.
    Ok,
    /// `-ERR <message>` with any surrounding quotes stripped.
    Err(String),
    /// `PING` keepalive check.
    Ping,
    /// `PONG` keepalive reply.
    Pong,
    /// `MSG` or `HMSG` data delivery.
    Msg(Delivery),
}

impl ServerOp {
    /// Short keyword used in diagnostics.
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Info(_) => "INFO",
            Self::Ok => "+OK",
            Self::Err(_) => "-ERR",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Msg(delivery) if delivery.headers.is_some() => "HMSG",
            Self::Msg(_) => "MSG",
        }
    }
}

/// Payload delivered on a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Subject the message was published to.
    pub subject: String,
    /// Subscription identifier the server matched.
    pub sid: String,
    /// Optional reply subject.
    pub reply_to: Option<String>,
    /// Raw header block for `HMSG` deliveries.
    pub headers: Option<Bytes>,
    /// Message body, exactly the declared number of bytes.
    pub payload: Bytes,
}

impl Delivery {
    /// Body as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn payload_text(&self) -> String { String::from_utf8_lossy(&self.payload).into_owned() }
}

/// A command written to the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientOp {
    /// `CONNECT {json}` handshake.
    Connect(ConnectInfo),
    /// `PING` keepalive check.
    Ping,
    /// `PONG` keepalive reply.
    Pong,
    /// `PUB <subject> [reply] <n>` followed by the payload.
    Pub {
        /// Destination subject.
        subject: String,
        /// Optional reply subject.
        reply_to: Option<String>,
        /// Message body.
        payload: Bytes,
    },
    /// `SUB <subject> [queue] <sid>`.
    Sub {
        /// Subject to receive.
        subject: String,
        /// Optional queue group.
        queue_group: Option<String>,
        /// Client-generated subscription id.
        sid: String,
    },
    /// `UNSUB <sid> [max]`.
    Unsub {
        /// Subscription id to cancel.
        sid: String,
        /// Optional number of messages to receive before auto-unsubscribing.
        max_msgs: Option<u64>,
    },
}

/// Reject subjects that the text protocol cannot carry.
///
/// # Errors
///
/// Returns [`FramingError::InvalidSubject`] when `subject` is empty or
/// contains whitespace.
///
/// # Examples
///
/// ```
/// use echo_nats::protocol::validate_subject;
///
/// assert!(validate_subject("private-orders.1").is_ok());
/// assert!(validate_subject("two words").is_err());
/// ```
pub fn validate_subject(subject: &str) -> Result<(), FramingError> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(FramingError::InvalidSubject {
            subject: subject.to_owned(),
        });
    }
    Ok(())
}
