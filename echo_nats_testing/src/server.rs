//! Scripted broker over the in-memory transport.

use std::time::Duration;

use bytes::Bytes;
use echo_nats::transport::memory::{self, MemoryAcceptor, MemoryPeer, MemoryTransport};
use serde_json::{Value, json};

/// How long helpers wait for the connector before failing the test.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Server half of an in-memory transport.
pub struct MockServer {
    acceptor: MemoryAcceptor,
    info: Value,
}

impl MockServer {
    /// Create a server and the transport a connector should use to reach it.
    #[must_use]
    pub fn new() -> (MemoryTransport, Self) {
        let (transport, acceptor) = memory::channel();
        let server = Self {
            acceptor,
            info: json!({
                "server_id": "mock",
                "version": "2.10.0",
                "proto": 1,
                "headers": true,
                "auth_required": false,
            }),
        };
        (transport, server)
    }

    /// Greet connections with `info` instead of the default capabilities.
    #[must_use]
    pub fn with_info(mut self, info: Value) -> Self {
        self.info = info;
        self
    }

    /// Wait for the next connection.
    ///
    /// # Panics
    ///
    /// Panics when no connection arrives within [`DEFAULT_WAIT`].
    pub async fn accept(&mut self) -> MockConnection {
        let peer = tokio::time::timeout(DEFAULT_WAIT, self.acceptor.accept())
            .await
            .expect("connector did not connect in time")
            .expect("transport dropped");
        MockConnection::new(peer)
    }

    /// Wait for the next connection and complete its handshake.
    ///
    /// # Panics
    ///
    /// Panics when the connector does not connect or misbehaves during the
    /// handshake.
    pub async fn accept_ready(&mut self) -> MockConnection {
        let mut conn = self.accept().await;
        conn.handshake(&self.info).await;
        conn
    }

    /// Assert that no connection is opened within `wait`.
    ///
    /// # Panics
    ///
    /// Panics when a connection arrives.
    pub async fn expect_no_connection(&mut self, wait: Duration) {
        let result = tokio::time::timeout(wait, self.acceptor.accept()).await;
        assert!(
            !matches!(result, Ok(Some(_))),
            "unexpected connection attempt"
        );
    }
}

/// One accepted connection, read line by line.
pub struct MockConnection {
    peer: MemoryPeer,
    buffer: String,
}

impl MockConnection {
    fn new(peer: MemoryPeer) -> Self {
        Self {
            peer,
            buffer: String::new(),
        }
    }

    /// Read the next CRLF-terminated line written by the connector, without
    /// its terminator.
    ///
    /// # Panics
    ///
    /// Panics when the connector closes or stays silent for
    /// [`DEFAULT_WAIT`].
    pub async fn next_line(&mut self) -> String {
        self.try_next_line(DEFAULT_WAIT)
            .await
            .expect("connector wrote no line in time")
    }

    /// Read the next line, or `None` when nothing arrives within `wait`.
    ///
    /// # Panics
    ///
    /// Panics when the connector writes invalid UTF-8.
    pub async fn try_next_line(&mut self, wait: Duration) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.find("\r\n") {
                let line = self.buffer[..end].to_owned();
                self.buffer.drain(..end + 2);
                return Some(line);
            }
            let chunk = tokio::time::timeout(wait, self.peer.recv())
                .await
                .ok()
                .flatten()?;
            self.buffer
                .push_str(std::str::from_utf8(&chunk).expect("connector wrote UTF-8"));
        }
    }

    /// Assert the next line equals `expected`.
    ///
    /// # Panics
    ///
    /// Panics on mismatch.
    pub async fn expect_line(&mut self, expected: &str) {
        let line = self.next_line().await;
        assert_eq!(line, expected, "unexpected command from connector");
    }

    /// Assert nothing is written within `wait`.
    ///
    /// # Panics
    ///
    /// Panics when a line arrives.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Some(line) = self.try_next_line(wait).await {
            panic!("unexpected command from connector: {line}");
        }
    }

    /// Assert the connector closes its side within `wait`, with no further
    /// commands.
    ///
    /// # Panics
    ///
    /// Panics when a command arrives or the link stays open.
    pub async fn expect_closed(&mut self, wait: Duration) {
        assert!(self.buffer.is_empty(), "unread command: {}", self.buffer);
        match tokio::time::timeout(wait, self.peer.recv()).await {
            Ok(None) => {}
            Ok(Some(chunk)) => panic!("unexpected command from connector: {chunk:?}"),
            Err(_) => panic!("connector kept the link open"),
        }
    }

    /// Send `INFO`, read `CONNECT` and `PING`, then acknowledge. Returns the
    /// `CONNECT` body.
    ///
    /// # Panics
    ///
    /// Panics when the connector does not follow the handshake.
    pub async fn handshake(&mut self, info: &Value) -> Value {
        self.send(format!("INFO {info}\r\n"));
        let connect = self.next_line().await;
        let body = connect
            .strip_prefix("CONNECT ")
            .unwrap_or_else(|| panic!("expected CONNECT, got {connect}"));
        let body: Value = serde_json::from_str(body).expect("CONNECT body is JSON");
        self.expect_line("PING").await;
        self.send("+OK\r\n");
        body
    }

    /// Read a `SUB` line for `subject` and return its subscription id.
    ///
    /// # Panics
    ///
    /// Panics when the next line is not a `SUB` for `subject`.
    pub async fn expect_sub(&mut self, subject: &str) -> String {
        let line = self.next_line().await;
        let fields: Vec<&str> = line.split(' ').collect();
        match fields.as_slice() {
            ["SUB", got, sid] | ["SUB", got, _, sid] if *got == subject => (*sid).to_owned(),
            _ => panic!("expected SUB {subject}, got {line}"),
        }
    }

    /// Read an `UNSUB` line and return its subscription id.
    ///
    /// # Panics
    ///
    /// Panics when the next line is not an `UNSUB`.
    pub async fn expect_unsub(&mut self) -> String {
        let line = self.next_line().await;
        line.strip_prefix("UNSUB ")
            .and_then(|rest| rest.split(' ').next())
            .unwrap_or_else(|| panic!("expected UNSUB, got {line}"))
            .to_owned()
    }

    /// Read a `PUB` line and its payload. Returns the subject and payload.
    ///
    /// # Panics
    ///
    /// Panics when the next line is not a `PUB` or the payload length does
    /// not match.
    pub async fn expect_pub(&mut self) -> (String, String) {
        let line = self.next_line().await;
        let fields: Vec<&str> = line.split(' ').collect();
        let (subject, len) = match fields.as_slice() {
            ["PUB", subject, len] | ["PUB", subject, _, len] => {
                ((*subject).to_owned(), len.parse::<usize>().expect("byte count"))
            }
            _ => panic!("expected PUB, got {line}"),
        };
        let payload = self.next_line().await;
        assert_eq!(payload.len(), len, "declared length mismatch");
        (subject, payload)
    }

    /// Deliver `payload` on `subject` for subscription `sid`.
    pub fn deliver(&self, subject: &str, sid: &str, payload: &str) {
        self.send(format!(
            "MSG {subject} {sid} {}\r\n{payload}\r\n",
            payload.len()
        ));
    }

    /// Deliver a JSON event envelope.
    pub fn deliver_event(&self, subject: &str, sid: &str, event: &str, data: &Value) {
        let payload = json!({ "event": event, "data": data }).to_string();
        self.deliver(subject, sid, &payload);
    }

    /// Write raw bytes to the connector. Send failures are ignored because
    /// the connector may already have closed.
    pub fn send(&self, bytes: impl Into<Bytes>) { let _ = self.peer.send(bytes); }

    /// Fail the connector's stream with an I/O error.
    pub fn fail(&self, kind: std::io::ErrorKind) {
        let _ = self.peer.fail(std::io::Error::new(kind, "mock failure"));
    }

    /// Close the connection from the server side.
    pub fn close(self) { self.peer.close(); }
}
