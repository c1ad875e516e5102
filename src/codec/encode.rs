//! Client command encoding.

use std::io;

use bytes::BytesMut;

use super::CodecError;
use crate::protocol::{ClientOp, validate_subject};

const CRLF: &[u8] = b"\r\n";

/// Encode `op` into `dst` as one or more CRLF-terminated lines.
pub(crate) fn encode_op(op: &ClientOp, dst: &mut BytesMut) -> Result<(), CodecError> {
    match op {
        ClientOp::Connect(info) => {
            let body = serde_json::to_vec(info)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            dst.reserve(body.len() + 10);
            dst.extend_from_slice(b"CONNECT ");
            dst.extend_from_slice(&body);
            dst.extend_from_slice(CRLF);
        }
        ClientOp::Ping => dst.extend_from_slice(b"PING\r\n"),
        ClientOp::Pong => dst.extend_from_slice(b"PONG\r\n"),
        ClientOp::Pub {
            subject,
            reply_to,
            payload,
        } => {
            validate_subject(subject)?;
            let len = payload.len().to_string();
            let mut fields = vec!["PUB", subject.as_str()];
            if let Some(reply) = reply_to {
                validate_subject(reply)?;
                fields.push(reply);
            }
            fields.push(&len);
            put_line(dst, &fields);
            dst.reserve(payload.len() + CRLF.len());
            dst.extend_from_slice(payload);
            dst.extend_from_slice(CRLF);
        }
        ClientOp::Sub {
            subject,
            queue_group,
            sid,
        } => {
            validate_subject(subject)?;
            validate_subject(sid)?;
            let mut fields = vec!["SUB", subject.as_str()];
            if let Some(queue) = queue_group {
                validate_subject(queue)?;
                fields.push(queue);
            }
            fields.push(sid);
            put_line(dst, &fields);
        }
        ClientOp::Unsub { sid, max_msgs } => {
            validate_subject(sid)?;
            let max = max_msgs.map(|n| n.to_string());
            let mut fields = vec!["UNSUB", sid.as_str()];
            if let Some(max) = &max {
                fields.push(max);
            }
            put_line(dst, &fields);
        }
    }
    Ok(())
}

fn put_line(dst: &mut BytesMut, fields: &[&str]) {
    let line = fields.join(" ");
    dst.reserve(line.len() + CRLF.len());
    dst.extend_from_slice(line.as_bytes());
    dst.extend_from_slice(CRLF);
}
