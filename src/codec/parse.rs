//! Control-line classification.
//!
//! Every server message starts with a keyword line terminated by CRLF. Most
//! keywords are complete on their own; `MSG` and `HMSG` announce a payload of
//! a declared byte count that follows the line terminator immediately.
//!
//! | Keyword | Shape                                          |
//! |---------|------------------------------------------------|
//! | `INFO`  | `INFO {json}`                                  |
//! | `+OK`   | `+OK`                                          |
//! | `-ERR`  | `-ERR '<message>'`                             |
//! | `PING`  | `PING`                                         |
//! | `PONG`  | `PONG`                                         |
//! | `MSG`   | `MSG <subject> <sid> [reply] <bytes>`          |
//! | `HMSG`  | `HMSG <subject> <sid> [reply] <hdr> <bytes>`   |
//!
//! Keywords are matched case-insensitively.

use bytes::Bytes;

use super::FramingError;
use crate::protocol::{Delivery, ServerOp};

/// Result of classifying a single non-empty control line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    /// A complete operation.
    Op(ServerOp),
    /// A delivery header; the payload follows.
    Delivery(PendingDelivery),
    /// A keyword this client does not understand.
    Unknown(String),
}

/// Delivery header waiting for its payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingDelivery {
    pub(crate) subject: String,
    pub(crate) sid: String,
    pub(crate) reply_to: Option<String>,
    pub(crate) header_len: Option<usize>,
    pub(crate) total_len: usize,
}

impl PendingDelivery {
    /// Attach the completed payload, splitting off the header block if any.
    pub(crate) fn complete(self, mut payload: Bytes) -> ServerOp {
        let headers = self.header_len.map(|len| payload.split_to(len));
        ServerOp::Msg(Delivery {
            subject: self.subject,
            sid: self.sid,
            reply_to: self.reply_to,
            headers,
            payload,
        })
    }
}

/// Classify a control line with its terminator already removed.
pub(crate) fn parse_line(line: &str) -> Result<Line, FramingError> {
    let line = line.trim();
    let (keyword, rest) = line
        .split_once(|c: char| c.is_ascii_whitespace())
        .map_or((line, ""), |(keyword, rest)| (keyword, rest.trim()));

    let op = match keyword.to_ascii_uppercase().as_str() {
        "INFO" => ServerOp::Info(rest.to_owned()),
        "+OK" => ServerOp::Ok,
        "-ERR" => ServerOp::Err(unquote(rest).to_owned()),
        "PING" => ServerOp::Ping,
        "PONG" => ServerOp::Pong,
        "MSG" => return parse_msg(line, rest).map(Line::Delivery),
        "HMSG" => return parse_hmsg(line, rest).map(Line::Delivery),
        _ => return Ok(Line::Unknown(keyword.to_owned())),
    };
    Ok(Line::Op(op))
}

fn parse_msg(line: &str, rest: &str) -> Result<PendingDelivery, FramingError> {
    let fields: Vec<&str> = rest.split_ascii_whitespace().collect();
    let (subject, sid, reply_to, count) = match fields.as_slice() {
        [subject, sid, count] => (*subject, *sid, None, *count),
        [subject, sid, reply, count] => (*subject, *sid, Some(*reply), *count),
        _ => return Err(malformed("MSG", line)),
    };
    Ok(PendingDelivery {
        subject: subject.to_owned(),
        sid: sid.to_owned(),
        reply_to: reply_to.map(str::to_owned),
        header_len: None,
        total_len: byte_count("MSG", count)?,
    })
}

fn parse_hmsg(line: &str, rest: &str) -> Result<PendingDelivery, FramingError> {
    let fields: Vec<&str> = rest.split_ascii_whitespace().collect();
    let (subject, sid, reply_to, header, total) = match fields.as_slice() {
        [subject, sid, header, total] => (*subject, *sid, None, *header, *total),
        [subject, sid, reply, header, total] => (*subject, *sid, Some(*reply), *header, *total),
        _ => return Err(malformed("HMSG", line)),
    };
    let header_len = byte_count("HMSG", header)?;
    let total_len = byte_count("HMSG", total)?;
    if header_len > total_len {
        return Err(FramingError::HeaderOverrun {
            header: header_len,
            total: total_len,
        });
    }
    Ok(PendingDelivery {
        subject: subject.to_owned(),
        sid: sid.to_owned(),
        reply_to: reply_to.map(str::to_owned),
        header_len: Some(header_len),
        total_len,
    })
}

fn byte_count(op: &'static str, token: &str) -> Result<usize, FramingError> {
    token
        .parse::<usize>()
        .map_err(|_| FramingError::InvalidByteCount {
            op,
            value: token.to_owned(),
        })
}

fn malformed(op: &'static str, line: &str) -> FramingError {
    FramingError::MalformedHeader {
        op,
        line: line.to_owned(),
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(text)
}
