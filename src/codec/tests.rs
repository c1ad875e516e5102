//! Unit tests for the broker codec.
//!
//! Covers line classification through the decoder, payload reassembly across
//! arbitrary chunk boundaries, malformed-header recovery and command encoding.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::protocol::{ConnectInfo, Delivery};

const STREAM: &[u8] = b"INFO {\"auth_required\":false}\r\n\
+OK\r\n\
MSG foo.bar sid_1 22\r\n{\"event\":\"E\",\"data\":1}\r\n\
PING\r\n\
MSG crlf 2 _INBOX.9 6\r\na\r\nb\r\n\r\n\
HMSG hdr 3 4 7\r\nH\r\n\rabc\r\n";

fn decode_all(chunks: &[&[u8]]) -> Vec<ServerOp> {
    let mut decoder = FrameDecoder::new();
    chunks.iter().flat_map(|chunk| decoder.feed(chunk)).collect()
}

fn msg(subject: &str, sid: &str, reply: Option<&str>, payload: &'static [u8]) -> ServerOp {
    ServerOp::Msg(Delivery {
        subject: subject.into(),
        sid: sid.into(),
        reply_to: reply.map(Into::into),
        headers: None,
        payload: Bytes::from_static(payload),
    })
}

#[test]
fn decodes_whole_stream_in_order() {
    let ops = decode_all(&[STREAM]);
    assert_eq!(ops.len(), 6);
    assert_eq!(ops[0], ServerOp::Info("{\"auth_required\":false}".into()));
    assert_eq!(ops[1], ServerOp::Ok);
    assert_eq!(
        ops[2],
        msg("foo.bar", "sid_1", None, b"{\"event\":\"E\",\"data\":1}")
    );
    assert_eq!(ops[3], ServerOp::Ping);
    assert_eq!(ops[4], msg("crlf", "2", Some("_INBOX.9"), b"a\r\nb\r\n"));
    let ServerOp::Msg(with_headers) = &ops[5] else {
        panic!("expected HMSG delivery, got {:?}", ops[5]);
    };
    assert_eq!(with_headers.headers.as_deref(), Some(&b"H\r\n\r"[..]));
    assert_eq!(with_headers.payload.as_ref(), b"abc");
}

#[test]
fn every_two_way_split_matches_unsplit_stream() {
    let expected = decode_all(&[STREAM]);
    for offset in 0..=STREAM.len() {
        let (head, tail) = STREAM.split_at(offset);
        assert_eq!(
            decode_all(&[head, tail]),
            expected,
            "split at byte {offset} changed the decoded sequence"
        );
    }
}

#[test]
fn byte_at_a_time_matches_unsplit_stream() {
    let chunks: Vec<&[u8]> = STREAM.chunks(1).collect();
    assert_eq!(decode_all(&chunks), decode_all(&[STREAM]));
}

proptest! {
    #[test]
    fn arbitrary_chunking_matches_unsplit_stream(
        mut cuts in proptest::collection::vec(0..STREAM.len(), 0..12)
    ) {
        cuts.sort_unstable();
        let mut chunks = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts {
            chunks.push(&STREAM[start..cut]);
            start = cut;
        }
        chunks.push(&STREAM[start..]);
        prop_assert_eq!(decode_all(&chunks), decode_all(&[STREAM]));
    }
}

#[test]
fn payload_accumulation_never_exceeds_declared_length() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder.feed(b"MSG a 1 4\r\nab").is_empty());
    assert_eq!(decoder.pending_payload(), Some((2, 4)));

    let ops = decoder.feed(b"cdPI");
    assert_eq!(ops, vec![msg("a", "1", None, b"abcd")]);
    assert_eq!(decoder.pending_payload(), None);
    assert_eq!(decoder.buffered(), 2, "surplus bytes stay buffered for line mode");

    assert_eq!(decoder.feed(b"NG\r\n"), vec![ServerOp::Ping]);
}

#[test]
fn tail_of_payload_and_next_header_in_one_chunk() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder.feed(b"MSG a 1 3\r\nx").is_empty());
    let ops = decoder.feed(b"yz\r\nMSG b 2 1\r\nq\r\n");
    assert_eq!(
        ops,
        vec![msg("a", "1", None, b"xyz"), msg("b", "2", None, b"q")]
    );
}

#[test]
fn zero_length_payload_is_delivered() {
    assert_eq!(
        decode_all(&[b"MSG empty 1 0\r\n\r\nPONG\r\n"]),
        vec![msg("empty", "1", None, b""), ServerOp::Pong]
    );
}

#[rstest]
#[case::too_few_fields(b"MSG orders 5\r\n".as_slice())]
#[case::non_numeric(b"MSG orders 1 five\r\n".as_slice())]
#[case::unknown_keyword(b"BOGUS 1 2 3\r\n".as_slice())]
fn malformed_lines_are_dropped_and_decoding_continues(#[case] bad: &[u8]) {
    let mut decoder = FrameDecoder::new();
    let mut ops = decoder.feed(bad);
    assert!(ops.is_empty());
    assert_eq!(decoder.pending_payload(), None, "must not wait on a payload");
    ops.extend(decoder.feed(b"PING\r\n"));
    assert_eq!(ops, vec![ServerOp::Ping]);
}

#[test]
fn bare_line_feed_terminators_are_accepted() {
    assert_eq!(
        decode_all(&[b"PING\nPONG\n"]),
        vec![ServerOp::Ping, ServerOp::Pong]
    );
}

#[test]
fn reset_discards_partial_payload() {
    let mut decoder = FrameDecoder::new();
    decoder.feed(b"MSG a 1 10\r\nabc");
    decoder.reset();
    assert_eq!(decoder.pending_payload(), None);
    assert_eq!(decoder.buffered(), 0);
    assert_eq!(decoder.feed(b"PING\r\n"), vec![ServerOp::Ping]);
}

#[test]
fn decode_eof_discards_partial_frame() {
    let mut codec = NatsCodec::new();
    let mut buf = BytesMut::from(&b"MSG a 1 10\r\nabc"[..]);
    assert_eq!(codec.decode_eof(&mut buf).expect("eof decode"), None);
    assert!(buf.is_empty());
    assert_eq!(codec.awaiting_payload(), None);
}

fn encode(op: ClientOp) -> Result<Vec<u8>, io::Error> {
    let mut buf = BytesMut::new();
    NatsCodec::new().encode(op, &mut buf)?;
    Ok(buf.to_vec())
}

#[rstest]
#[case(ClientOp::Ping, "PING\r\n")]
#[case(ClientOp::Pong, "PONG\r\n")]
#[case(
    ClientOp::Sub { subject: "foo.bar".into(), queue_group: None, sid: "sid_1".into() },
    "SUB foo.bar sid_1\r\n"
)]
#[case(
    ClientOp::Sub { subject: "foo".into(), queue_group: Some("workers".into()), sid: "9".into() },
    "SUB foo workers 9\r\n"
)]
#[case(ClientOp::Unsub { sid: "9".into(), max_msgs: None }, "UNSUB 9\r\n")]
#[case(ClientOp::Unsub { sid: "9".into(), max_msgs: Some(5) }, "UNSUB 9 5\r\n")]
#[case(
    ClientOp::Pub { subject: "chat".into(), reply_to: None, payload: Bytes::from_static(b"hi\r\nyo") },
    "PUB chat 6\r\nhi\r\nyo\r\n"
)]
fn encodes_commands(#[case] op: ClientOp, #[case] expected: &str) {
    let bytes = encode(op).expect("encode should succeed");
    assert_eq!(String::from_utf8_lossy(&bytes), expected);
}

#[test]
fn connect_carries_json_body() {
    let info = ConnectInfo::new(&Default::default(), &Default::default());
    let bytes = encode(ClientOp::Connect(info)).expect("encode should succeed");
    let text = String::from_utf8(bytes).expect("utf-8");
    let body = text
        .strip_prefix("CONNECT ")
        .and_then(|rest| rest.strip_suffix("\r\n"))
        .expect("CONNECT framing");
    let json: serde_json::Value = serde_json::from_str(body).expect("json body");
    assert_eq!(json["lang"], "rust");
    assert!(json.get("user").is_none());
}

#[rstest]
#[case::empty_subject(ClientOp::Sub { subject: String::new(), queue_group: None, sid: "1".into() })]
#[case::spaced_subject(ClientOp::Pub { subject: "a b".into(), reply_to: None, payload: Bytes::new() })]
#[case::spaced_sid(ClientOp::Unsub { sid: "1 2".into(), max_msgs: None })]
fn rejects_unwritable_subjects(#[case] op: ClientOp) {
    let err = encode(op).expect_err("encode should fail");
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    let source = err.get_ref().and_then(|inner| inner.downcast_ref::<CodecError>());
    assert!(
        matches!(source, Some(CodecError::Framing(FramingError::InvalidSubject { .. }))),
        "{err:?}"
    );
}
