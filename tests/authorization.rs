//! Private channel authorisation against an HTTP endpoint.

use std::time::Duration;

use echo_nats::{Connector, ConnectorError, channel::Subscribable, config::ConnectorConfig};
use echo_nats_testing::{DEFAULT_WAIT, MockConnection, MockServer};
use serde_json::json;
use tokio::sync::mpsc::unbounded_channel;
use wiremock::{
    Mock,
    MockServer as HttpServer,
    ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

async fn connected(http: &HttpServer) -> (Connector, MockConnection) {
    let config = ConnectorConfig::default()
        .with_auth_endpoint(format!("{}/broadcasting/auth", http.uri()))
        .with_auth_header("Authorization", "Bearer app-token");
    let (transport, mut server) = MockServer::new();
    let connector = Connector::builder(config)
        .transport(transport)
        .socket_id("77.88")
        .build()
        .expect("connector");
    let (result, conn) = tokio::join!(connector.connect(), server.accept_ready());
    result.expect("connected");
    (connector, conn)
}

#[tokio::test]
async fn private_channel_subscribes_after_authorisation() {
    let http = HttpServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .and(header("Authorization", "Bearer app-token"))
        .and(body_partial_json(json!({
            "channel_name": "private-orders.1",
            "socket_id": "77.88",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": "sig"})))
        .expect(1)
        .mount(&http)
        .await;

    let (connector, mut conn) = connected(&http).await;
    let channel = connector.private_channel("orders.1");
    channel.subscribe().await.expect("authorised");

    conn.expect_sub("private-orders.1").await;
    assert!(channel.is_subscribed());
    assert_eq!(channel.authorization().map(|auth| auth.auth), Some("sig".into()));
}

#[tokio::test]
async fn rejected_authorisation_leaves_channel_unsubscribed() {
    let http = HttpServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&http)
        .await;

    let (connector, mut conn) = connected(&http).await;
    let channel = connector.private_channel("orders.1");
    let (tx, mut errors) = unbounded_channel();
    channel.error(move |data| {
        let _ = tx.send(data.clone());
    });

    let reported = tokio::time::timeout(DEFAULT_WAIT, errors.recv())
        .await
        .expect("error in time")
        .expect("subscription error event");
    assert!(reported["message"].as_str().is_some_and(|m| m.contains("403")));
    assert!(!channel.is_subscribed());

    let err = channel.subscribe().await.expect_err("rejected again");
    assert!(matches!(err, ConnectorError::Auth { ref channel, .. } if channel == "private-orders.1"));
    assert!(!err.is_transient());
    conn.expect_silence(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn presence_authorisation_exposes_member_data() {
    let http = HttpServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": "sig",
            "channel_data": "{\"user_id\":9}",
        })))
        .mount(&http)
        .await;

    let (connector, mut conn) = connected(&http).await;
    let room = connector.join("room.9");
    room.subscribe().await.expect("authorised");

    conn.expect_sub("presence-room.9").await;
    let auth = room.authorization().expect("authorisation kept");
    assert_eq!(auth.channel_data, Some(json!("{\"user_id\":9}")));
}
