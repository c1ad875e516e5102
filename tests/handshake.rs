//! Connection establishment failures.

use std::time::Duration;

use echo_nats::{
    ConnectionState,
    Connector,
    ConnectorError,
    codec::ProtocolError,
    config::ConnectorConfig,
};
use echo_nats_testing::MockServer;
use rstest::rstest;
use serde_json::json;

fn connector(config: ConnectorConfig) -> (Connector, MockServer) {
    let (transport, server) = MockServer::new();
    let connector = Connector::builder(config)
        .transport(transport)
        .build()
        .expect("connector");
    (connector, server)
}

#[tokio::test]
async fn server_rejection_fails_connect() {
    let (connector, mut server) = connector(ConnectorConfig::default());
    let server_side = async {
        let mut conn = server.accept().await;
        conn.send(format!("INFO {}\r\n", json!({"server_id": "s"})));
        let connect = conn.next_line().await;
        assert!(connect.starts_with("CONNECT "));
        conn.send("-ERR 'Authorization Violation'\r\n");
        conn
    };

    let (result, _conn) = tokio::join!(connector.connect(), server_side);
    assert!(matches!(
        result,
        Err(ConnectorError::Protocol(ProtocolError::Server { ref message }))
            if message == "Authorization Violation"
    ));
    assert!(!connector.is_connected());
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out() {
    let timeout = Duration::from_millis(200);
    let (connector, mut server) = connector(
        ConnectorConfig::default()
            .with_connect_timeout(timeout)
            .with_max_reconnect_attempts(0),
    );

    let (result, mut conn) = tokio::join!(connector.connect(), server.accept());
    assert!(matches!(result, Err(ConnectorError::Timeout(waited)) if waited == timeout));
    assert!(result.as_ref().is_err_and(ConnectorError::is_transient));
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    conn.expect_closed(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn timed_out_handshake_schedules_a_reconnect() {
    let timeout = Duration::from_millis(200);
    let (connector, mut server) = connector(
        ConnectorConfig::default()
            .with_connect_timeout(timeout)
            .with_reconnect_delay(Duration::from_millis(50)),
    );
    let (tx, mut reconnecting) = tokio::sync::mpsc::unbounded_channel();
    connector.on("reconnecting", move |data| {
        let _ = tx.send(data.clone());
    });

    let (result, mut first) = tokio::join!(connector.connect(), server.accept());
    assert!(matches!(result, Err(ConnectorError::Timeout(_))));
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert_eq!(
        reconnecting.try_recv().expect("reconnect scheduled with the error"),
        json!({"attempt": 1, "delay_ms": 50})
    );
    assert!(reconnecting.try_recv().is_err(), "loss reported once");
    first.expect_closed(Duration::from_secs(1)).await;

    let _second = server.accept_ready().await;
    let mut states = connector.state_changes();
    states
        .wait_for(|state| *state == ConnectionState::Connected)
        .await
        .expect("reconnected");
}

#[rstest]
#[case::empty_host(ConnectorConfig::default().with_host(""))]
#[case::no_pings(ConnectorConfig::default().with_max_pings_outstanding(0))]
fn invalid_configuration_is_rejected(#[case] config: ConnectorConfig) {
    let (transport, _server) = MockServer::new();
    let result = Connector::builder(config).transport(transport).build();
    assert!(matches!(result, Err(ConnectorError::Config(_))));
}

#[tokio::test]
async fn unreachable_server_reports_transport_error() {
    let (connector, server) = connector(
        ConnectorConfig::default().with_max_reconnect_attempts(0),
    );
    drop(server);

    let result = connector.connect().await;
    assert!(matches!(result, Err(ConnectorError::Transport(_))), "{result:?}");
}
