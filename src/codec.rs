//! Framing codec for the broker's text protocol.
//!
//! The server speaks newline-delimited control lines. Data deliveries embed a
//! payload of a declared byte count directly after the `MSG` line terminator,
//! so the decoder alternates between two modes:
//!
//! - **Line mode** splits buffered bytes on `\n`, strips the optional `\r`,
//!   and classifies the line by its leading keyword.
//! - **Payload mode** is entered on a `MSG`/`HMSG` header and waits until the
//!   declared number of bytes is buffered. Exactly that many bytes become the
//!   payload; whatever follows is parsed in line mode again.
//!
//! Payload bytes are never interpreted, so a payload containing CRLF is
//! delivered intact, and a transport chunk carrying the tail of one payload
//! plus the next header is split correctly.
//!
//! # Error Handling
//!
//! Malformed lines and unknown keywords are logged and dropped; the decoder
//! resets to line mode rather than waiting on a payload that cannot resolve.
//! See the [`error`] module for the taxonomy used by the encoder.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    metrics::{self, Direction},
    protocol::{ClientOp, ServerOp},
};

mod encode;
pub mod error;
mod parse;

pub use error::{CodecError, FramingError, ProtocolError};
use parse::{Line, PendingDelivery, parse_line};

/// Tokio codec for the broker protocol.
///
/// Decodes [`ServerOp`]s and encodes [`ClientOp`]s. The decoder keeps the
/// pending delivery header between calls; the byte buffer itself is owned by
/// the caller, as with any [`Decoder`].
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use echo_nats::{codec::NatsCodec, protocol::ServerOp};
/// use tokio_util::codec::Decoder;
///
/// let mut codec = NatsCodec::new();
/// let mut buf = BytesMut::from(&b"PING\r\nMSG a 1 2\r\nh"[..]);
/// assert_eq!(codec.decode(&mut buf).unwrap(), Some(ServerOp::Ping));
/// assert_eq!(codec.decode(&mut buf).unwrap(), None);
/// assert_eq!(codec.awaiting_payload(), Some(2));
/// ```
#[derive(Debug, Default)]
pub struct NatsCodec {
    pending: Option<PendingDelivery>,
}

impl NatsCodec {
    /// Create a codec in line mode.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Declared payload length when a delivery header is waiting for its body.
    #[must_use]
    pub fn awaiting_payload(&self) -> Option<usize> {
        self.pending.as_ref().map(|pending| pending.total_len)
    }

    /// Drop any pending delivery header and return to line mode.
    pub fn reset(&mut self) { self.pending = None; }
}

impl Decoder for NatsCodec {
    type Item = ServerOp;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(pending) = self.pending.take() {
                if src.len() < pending.total_len {
                    self.pending = Some(pending);
                    return Ok(None);
                }
                let payload = src.split_to(pending.total_len).freeze();
                return Ok(Some(pending.complete(payload)));
            }

            let Some(newline) = src.iter().position(|&byte| byte == b'\n') else {
                return Ok(None);
            };
            let raw = src.split_to(newline + 1);
            let line = String::from_utf8_lossy(strip_terminator(&raw));
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(&line) {
                Ok(Line::Op(op)) => return Ok(Some(op)),
                Ok(Line::Delivery(pending)) => self.pending = Some(pending),
                Ok(Line::Unknown(keyword)) => {
                    tracing::warn!(keyword = %keyword, "discarding unrecognised operation");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed control line");
                    metrics::inc_errors();
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(op) = self.decode(buf)? {
            return Ok(Some(op));
        }
        if !buf.is_empty() || self.pending.is_some() {
            tracing::debug!(
                buffered = buf.len(),
                awaiting = ?self.awaiting_payload(),
                "discarding partial frame at end of stream"
            );
        }
        buf.clear();
        self.reset();
        Ok(None)
    }
}

impl Encoder<ClientOp> for NatsCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ClientOp, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode::encode_op(&item, dst).map_err(io::Error::from)
    }
}

fn strip_terminator(raw: &[u8]) -> &[u8] {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Chunk-oriented front end to [`NatsCodec`].
///
/// Transports hand over arbitrarily sized chunks; `feed` appends each chunk
/// to an internal buffer and drains every operation that is now complete.
/// Partial lines and partial payloads stay buffered across calls.
///
/// # Examples
///
/// ```
/// use echo_nats::{codec::FrameDecoder, protocol::ServerOp};
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.feed(b"MSG news 1 5\r\nhel").is_empty());
/// assert_eq!(decoder.pending_payload(), Some((3, 5)));
///
/// let ops = decoder.feed(b"lo\r\nPING\r\n");
/// assert_eq!(ops.len(), 2);
/// assert!(matches!(&ops[0], ServerOp::Msg(msg) if msg.payload.as_ref() == b"hello"));
/// assert_eq!(ops[1], ServerOp::Ping);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: NatsCodec,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder in line mode.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append `chunk` and return every operation it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerOp> {
        self.buffer.extend_from_slice(chunk);
        let mut ops = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(op)) => {
                    metrics::inc_frames(Direction::Inbound);
                    ops.push(op);
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "decoder failed, resetting");
                    self.reset();
                    break;
                }
            }
        }
        ops
    }

    /// Bytes accumulated and bytes expected for the payload being assembled.
    ///
    /// The accumulated count never exceeds the expected count; surplus bytes
    /// belong to the next message.
    #[must_use]
    pub fn pending_payload(&self) -> Option<(usize, usize)> {
        self.codec
            .awaiting_payload()
            .map(|expected| (self.buffer.len().min(expected), expected))
    }

    /// Number of bytes buffered but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    /// Discard buffered bytes and return to line mode.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec.reset();
    }
}

#[cfg(test)]
mod tests;
