//! Connector tests over the in-memory transport.

use std::time::Duration;

use async_trait::async_trait;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use super::*;
use crate::{
    auth::AuthError,
    channel::{PresenceAware, Subscribable, Whisperable},
    codec::ProtocolError,
    transport::memory::{self, MemoryAcceptor, MemoryPeer},
};

const GREETING: &str = "INFO {\"server_id\":\"test\",\"version\":\"2.10.0\"}\r\n";

/// Authoriser granting every channel a predictable token.
struct StaticAuthorizer;

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, request: AuthRequest<'_>) -> Result<Authorization, AuthError> {
        Ok(Authorization {
            auth: format!("token:{}:{}", request.channel_name, request.socket_id),
            channel_data: None,
            shared_secret: None,
        })
    }
}

fn config() -> ConnectorConfig {
    ConnectorConfig::default()
        .with_reconnect_delay(Duration::from_millis(10))
        .with_connect_timeout(Duration::from_secs(2))
}

fn connector_with(config: ConnectorConfig) -> (Connector, MemoryAcceptor) {
    let (transport, acceptor) = memory::channel();
    let connector = Connector::builder(config)
        .transport(transport)
        .authorizer(StaticAuthorizer)
        .socket_id("1.2")
        .build()
        .expect("connector");
    (connector, acceptor)
}

#[fixture]
fn pair() -> (Connector, MemoryAcceptor) { connector_with(config()) }

async fn line(peer: &mut MemoryPeer) -> String {
    let chunk = peer.recv().await.expect("client wrote");
    String::from_utf8(chunk.to_vec()).expect("utf-8 command")
}

/// Play the server side of the handshake.
async fn handshake(peer: &mut MemoryPeer) {
    peer.send(GREETING).expect("send greeting");
    let connect = line(peer).await;
    assert!(connect.starts_with("CONNECT {"), "unexpected: {connect}");
    assert_eq!(line(peer).await, "PING\r\n");
    peer.send("+OK\r\n").expect("send ack");
}

async fn connected(connector: &Connector, acceptor: &mut MemoryAcceptor) -> MemoryPeer {
    let server = async {
        let mut peer = acceptor.accept().await.expect("peer");
        handshake(&mut peer).await;
        peer
    };
    let (result, peer) = tokio::join!(connector.connect(), server);
    result.expect("connected");
    peer
}

fn events(connector: &Connector, event: &str) -> UnboundedReceiver<Value> {
    let (tx, rx) = unbounded_channel();
    connector.on(event, move |data| {
        let _ = tx.send(data.clone());
    });
    rx
}

async fn next(rx: &mut UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("sender alive")
}

#[rstest]
#[tokio::test]
async fn connect_completes_handshake(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut connects = events(&connector, "connect");
    let mut connecteds = events(&connector, "connected");

    let _peer = connected(&connector, &mut acceptor).await;

    assert!(connector.is_connected());
    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(next(&mut connects).await, Value::Null);
    assert_eq!(next(&mut connecteds).await, Value::Null);
    let info = connector.server_info().expect("server info");
    assert_eq!(info.server_id, "test");
}

#[rstest]
#[tokio::test]
async fn concurrent_connects_share_one_attempt(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let server = async {
        let mut peer = acceptor.accept().await.expect("peer");
        handshake(&mut peer).await;
        peer
    };
    let (first, second, _peer) = tokio::join!(connector.connect(), connector.connect(), server);
    first.expect("first");
    second.expect("second");
    assert!(acceptor.try_accept().is_none());

    connector.connect().await.expect("already connected");
    assert!(acceptor.try_accept().is_none());
}

#[rstest]
#[tokio::test]
async fn subscriptions_made_offline_are_sent_on_ready(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    connector.channel("orders").listen("Shipped", |_| {});
    connector.channel("news").listen("Posted", |_| {});

    let mut peer = connected(&connector, &mut acceptor).await;
    assert_eq!(line(&mut peer).await, "SUB orders sid_1\r\n");
    assert_eq!(line(&mut peer).await, "SUB news sid_2\r\n");
}

#[rstest]
#[tokio::test]
async fn delivers_message_to_listener_once(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let (tx, mut rx) = unbounded_channel();
    connector.listen("foo.bar", "E", move |data| {
        let _ = tx.send(data.clone());
    });
    connector
        .channel("foo.bar")
        .listen("Other", |_| panic!("wrong listener"));

    let mut peer = connected(&connector, &mut acceptor).await;
    assert_eq!(line(&mut peer).await, "SUB foo.bar sid_1\r\n");
    peer.send("MSG foo.bar sid_1 22\r\n{\"event\":\"E\",\"data\":1}\r\nPING\r\n")
        .expect("deliver");

    assert_eq!(line(&mut peer).await, "PONG\r\n");
    assert_eq!(next(&mut rx).await, json!(1));
    assert!(rx.try_recv().is_err());
}

#[rstest]
#[tokio::test]
async fn global_handlers_see_raw_and_formatted_events(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut raw = events(&connector, "message");
    let mut formatted = events(&connector, "App.Events.E");
    connector.channel("foo").listen("E", |_| {});

    let mut peer = connected(&connector, &mut acceptor).await;
    assert_eq!(line(&mut peer).await, "SUB foo sid_1\r\n");
    peer.send("MSG foo sid_1 22\r\n{\"event\":\"E\",\"data\":2}\r\n")
        .expect("deliver");

    assert_eq!(next(&mut raw).await, json!({"event": "E", "data": 2}));
    assert_eq!(next(&mut formatted).await, json!(2));
}

#[rstest]
#[tokio::test]
async fn reconnect_replays_only_subscribed_channels(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut reconnecting = events(&connector, "reconnecting");
    connector.channel("kept").listen("E", |_| {});
    connector.channel("left").listen("E", |_| {});

    let mut peer = connected(&connector, &mut acceptor).await;
    assert_eq!(line(&mut peer).await, "SUB kept sid_1\r\n");
    assert_eq!(line(&mut peer).await, "SUB left sid_2\r\n");

    connector.leave_channel("left");
    assert_eq!(line(&mut peer).await, "UNSUB sid_2\r\n");

    peer.close();
    assert_eq!(
        next(&mut reconnecting).await,
        json!({"attempt": 1, "delay_ms": 10})
    );

    let mut peer = acceptor.accept().await.expect("reconnected peer");
    handshake(&mut peer).await;
    assert_eq!(line(&mut peer).await, "SUB kept sid_1\r\n");
    peer.send("PING\r\n").expect("ping");
    assert_eq!(line(&mut peer).await, "PONG\r\n");
    assert_eq!(connector.channels(), vec!["kept".to_owned()]);
}

#[rstest]
#[tokio::test]
async fn left_channel_handle_receives_after_listening_again(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let room = connector.channel("room");
    room.listen("E", |_| {});

    let mut peer = connected(&connector, &mut acceptor).await;
    assert_eq!(line(&mut peer).await, "SUB room sid_1\r\n");
    connector.leave_channel("room");
    assert_eq!(line(&mut peer).await, "UNSUB sid_1\r\n");
    assert!(connector.channels().is_empty());

    let (tx, mut rx) = unbounded_channel();
    room.listen("E", move |data| {
        let _ = tx.send(data.clone());
    });
    assert_eq!(line(&mut peer).await, "SUB room sid_2\r\n");
    assert_eq!(connector.channels(), vec!["room".to_owned()]);

    peer.send("MSG room sid_2 22\r\n{\"event\":\"E\",\"data\":3}\r\n")
        .expect("deliver");
    assert_eq!(next(&mut rx).await, json!(3));
}

#[rstest]
#[tokio::test]
async fn channel_left_offline_is_not_replayed(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    connector.channel("gone").listen("E", |_| {});
    connector.channel("kept").listen("E", |_| {});
    connector.leave_channel("gone");

    let mut peer = connected(&connector, &mut acceptor).await;
    assert_eq!(line(&mut peer).await, "SUB kept sid_2\r\n");
    peer.send("PING\r\n").expect("ping");
    assert_eq!(line(&mut peer).await, "PONG\r\n");
}

#[rstest]
#[tokio::test]
async fn disconnect_does_not_reconnect(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut disconnects = events(&connector, "disconnect");
    let _peer = connected(&connector, &mut acceptor).await;

    connector.disconnect().await;
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert_eq!(next(&mut disconnects).await, json!({"reason": "cancelled"}));

    let again = tokio::time::timeout(Duration::from_millis(100), acceptor.accept()).await;
    assert!(again.is_err(), "no reconnect after disconnect");
}

#[tokio::test(start_paused = true)]
async fn connect_times_out_without_greeting() {
    let (connector, mut acceptor) =
        connector_with(config().with_connect_timeout(Duration::from_millis(50)));
    let server = async { acceptor.accept().await.expect("peer") };

    let (result, _peer) = tokio::join!(connector.connect(), server);
    assert!(matches!(
        result,
        Err(ConnectorError::Timeout(timeout)) if timeout == Duration::from_millis(50)
    ));
    assert!(!connector.is_connected());
}

#[rstest]
#[tokio::test]
async fn server_error_during_handshake_fails_connect(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut errors = events(&connector, "error");
    let server = async {
        let mut peer = acceptor.accept().await.expect("peer");
        peer.send(GREETING).expect("greeting");
        let _ = line(&mut peer).await;
        peer.send("-ERR 'Authorization Violation'\r\n").expect("err");
        peer
    };

    let (result, _peer) = tokio::join!(connector.connect(), server);
    match result {
        Err(ConnectorError::Protocol(ProtocolError::Server { message })) => {
            assert_eq!(message, "Authorization Violation");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        next(&mut errors).await,
        json!({"message": "server error: Authorization Violation"})
    );
}

#[rstest]
#[tokio::test]
async fn steady_state_server_error_keeps_connection(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut errors = events(&connector, "error");
    let mut peer = connected(&connector, &mut acceptor).await;

    peer.send("-ERR 'Permissions Violation'\r\nPING\r\n")
        .expect("err");
    assert_eq!(next(&mut errors).await, json!({"message": "Permissions Violation"}));
    assert_eq!(line(&mut peer).await, "PONG\r\n");
    assert!(connector.is_connected());
}

#[rstest]
#[tokio::test]
async fn publish_requires_connection(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    assert!(matches!(
        connector.publish("orders", "hello"),
        Err(ConnectorError::NotConnected)
    ));

    let mut peer = connected(&connector, &mut acceptor).await;
    connector.publish("orders", "hello").expect("publish");
    assert_eq!(line(&mut peer).await, "PUB orders 5\r\nhello\r\n");
    assert!(matches!(
        connector.publish("bad subject", "x"),
        Err(ConnectorError::Framing(_))
    ));
}

#[rstest]
#[tokio::test]
async fn private_channel_authorises_with_socket_id(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut peer = connected(&connector, &mut acceptor).await;

    let channel = connector.private_channel("orders");
    channel.subscribe().await.expect("subscribed");
    assert_eq!(line(&mut peer).await, "SUB private-orders sid_1\r\n");
    let auth = channel.authorization().expect("authorised");
    assert_eq!(auth.auth, "token:private-orders:1.2");
}

#[rstest]
#[tokio::test]
async fn whisper_publishes_client_event(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut peer = connected(&connector, &mut acceptor).await;
    let room = connector.join("room.1");
    room.subscribe().await.expect("subscribed");
    assert_eq!(line(&mut peer).await, "SUB presence-room.1 sid_1\r\n");

    room.whisper("typing", &json!({"id": 7})).expect("whisper");
    let published = line(&mut peer).await;
    let (header, body) = published.split_once("\r\n").expect("header line");
    assert!(header.starts_with("PUB presence-room.1 "));
    let body: Value = serde_json::from_str(body.trim_end()).expect("json body");
    assert_eq!(body, json!({"event": "client-typing", "data": {"id": 7}}));
}

#[rstest]
#[tokio::test]
async fn presence_snapshot_reaches_late_here_callback(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let mut peer = connected(&connector, &mut acceptor).await;
    let room = connector.join("room");
    room.subscribe().await.expect("subscribed");
    assert_eq!(line(&mut peer).await, "SUB presence-room sid_1\r\n");

    let body = r#"{"event":"presence:here","data":[{"id":1},{"id":2}]}"#;
    peer.send(format!("MSG presence-room sid_1 {}\r\n{body}\r\nPING\r\n", body.len()))
        .expect("snapshot");
    assert_eq!(line(&mut peer).await, "PONG\r\n");

    let (tx, mut rx) = unbounded_channel();
    room.here(move |members| {
        let _ = tx.send(members.clone());
    });
    assert_eq!(rx.try_recv().expect("immediate"), json!([{"id": 1}, {"id": 2}]));
    assert_eq!(room.members().map(|members| members.len()), Some(2));
}

#[rstest]
#[tokio::test]
async fn leave_removes_every_variant(pair: (Connector, MemoryAcceptor)) {
    let (connector, _acceptor) = pair;
    let _ = connector.channel("chat");
    let _ = connector.private_channel("chat");
    let _ = connector.join("chat");
    let _ = connector.channel("other");

    connector.leave("chat");
    assert_eq!(connector.channels(), vec!["other".to_owned()]);
}

#[rstest]
fn notification_channel_uses_prefix(pair: (Connector, MemoryAcceptor)) {
    let (connector, _acceptor) = pair;
    let channel = connector.notification(42);
    assert_eq!(channel.name(), "private-App.Models.User.42");
}

#[rstest]
#[tokio::test]
async fn off_removes_global_handlers(pair: (Connector, MemoryAcceptor)) {
    let (connector, mut acceptor) = pair;
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = crate::channel::listener(move |_, _| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    connector.on_listener("connected", Arc::clone(&handler));
    connector.off("connected", Some(&handler));

    let _peer = connected(&connector, &mut acceptor).await;
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_pings_close_the_connection() {
    let (connector, mut acceptor) = connector_with(
        config()
            .with_keepalive_interval(Duration::from_secs(1))
            .with_max_pings_outstanding(1),
    );
    let mut disconnects = events(&connector, "disconnect");
    let mut peer = connected(&connector, &mut acceptor).await;

    assert_eq!(line(&mut peer).await, "PING\r\n");
    assert_eq!(
        next(&mut disconnects).await,
        json!({"reason": "1 pings unanswered"})
    );
    assert!(!connector.is_connected());
}

#[tokio::test(start_paused = true)]
async fn keepalive_period_starts_when_ready() {
    let (connector, mut acceptor) =
        connector_with(config().with_keepalive_interval(Duration::from_secs(1)));
    let server = async {
        let mut peer = acceptor.accept().await.expect("peer");
        tokio::time::sleep(Duration::from_millis(800)).await;
        handshake(&mut peer).await;
        peer
    };
    let (result, mut peer) = tokio::join!(connector.connect(), server);
    result.expect("connected");

    let early = tokio::time::timeout(Duration::from_millis(900), line(&mut peer)).await;
    assert!(early.is_err(), "keepalive fired before a full period: {early:?}");
    assert_eq!(line(&mut peer).await, "PING\r\n");
}
