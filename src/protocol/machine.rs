//! Sans-IO protocol state machine.
//!
//! The machine drives the handshake (greeting, `CONNECT`, acknowledgement)
//! and classifies steady-state traffic. It never performs I/O: every input
//! yields a list of [`Action`]s for the connection driver to carry out in
//! order.
//!
//! ```text
//! AwaitingGreeting --INFO--> AwaitingAck --+OK / PONG--> Ready
//!        |                        |                        |
//!        +-------- -ERR / close --+--------- close --------+--> Closed
//! ```
//!
//! The handshake sends `CONNECT` followed by `PING`. A non-verbose server
//! never acknowledges `CONNECT` with `+OK`, so the `PONG` answering that
//! `PING` completes the handshake as well.

use std::{fmt, sync::Arc};

use super::{ClientOp, ConnectInfo, Delivery, ServerInfo, ServerOp};
use crate::{codec::ProtocolError, config::ConnectorConfig};

/// Handshake progress of a single transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the server's `INFO` greeting.
    AwaitingGreeting,
    /// `CONNECT` sent; waiting for `+OK` or `PONG`.
    AwaitingAck,
    /// Handshake complete.
    Ready,
    /// The connection is finished and accepts no further input.
    Closed,
}

impl Phase {
    /// Lower-case label used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingGreeting => "awaiting greeting",
            Self::AwaitingAck => "awaiting acknowledgement",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Work requested by the state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Write a command to the server.
    Send(ClientOp),
    /// The handshake completed; replay subscriptions and notify handlers.
    Ready,
    /// Route a data delivery to its channel.
    Deliver(Delivery),
    /// The server reported an error after the handshake. The connection stays
    /// open.
    ServerError(String),
    /// The handshake failed; the connection must be closed.
    HandshakeFailed(ProtocolError),
}

/// Outcome of a keepalive timer tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keepalive {
    /// Send a `PING`.
    Ping,
    /// Too many pings went unanswered; the connection is stale.
    Stale {
        /// Pings sent without a matching `PONG`.
        outstanding: u32,
    },
    /// Nothing to do because the handshake has not completed.
    Idle,
}

/// Per-connection protocol state.
///
/// Create one machine for every transport connection; a reconnect starts
/// again from [`Phase::AwaitingGreeting`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use echo_nats::{
///     config::ConnectorConfig,
///     protocol::{Action, ClientOp, Phase, ProtocolMachine, ServerOp},
/// };
///
/// let mut machine = ProtocolMachine::new(Arc::new(ConnectorConfig::default()));
/// let actions = machine.handle(ServerOp::Info("{}".into()));
/// assert!(matches!(actions[0], Action::Send(ClientOp::Connect(_))));
/// assert_eq!(actions[1], Action::Send(ClientOp::Ping));
///
/// assert_eq!(machine.handle(ServerOp::Ok), vec![Action::Ready]);
/// assert_eq!(machine.phase(), Phase::Ready);
/// ```
#[derive(Debug)]
pub struct ProtocolMachine {
    config: Arc<ConnectorConfig>,
    phase: Phase,
    server_info: Option<ServerInfo>,
    pings_outstanding: u32,
}

impl ProtocolMachine {
    /// Create a machine waiting for the server greeting.
    #[must_use]
    pub fn new(config: Arc<ConnectorConfig>) -> Self {
        Self {
            config,
            phase: Phase::AwaitingGreeting,
            server_info: None,
            pings_outstanding: 0,
        }
    }

    /// Current handshake phase.
    #[must_use]
    pub fn phase(&self) -> Phase { self.phase }

    /// Capabilities from the most recent `INFO`, once the greeting arrived.
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> { self.server_info.as_ref() }

    /// Pings sent since the last `PONG`.
    #[must_use]
    pub fn pings_outstanding(&self) -> u32 { self.pings_outstanding }

    /// Feed one decoded server operation.
    pub fn handle(&mut self, op: ServerOp) -> Vec<Action> {
        match (self.phase, op) {
            (Phase::Closed, op) => {
                tracing::trace!(op = op.keyword(), "ignoring operation after close");
                Vec::new()
            }
            (_, ServerOp::Ping) => vec![Action::Send(ClientOp::Pong)],
            (Phase::AwaitingGreeting, ServerOp::Info(body)) => self.on_greeting(&body),
            (Phase::AwaitingGreeting | Phase::AwaitingAck, ServerOp::Err(message)) => {
                self.phase = Phase::Closed;
                vec![Action::HandshakeFailed(ProtocolError::Server { message })]
            }
            (Phase::AwaitingAck, ServerOp::Ok | ServerOp::Pong) => {
                self.phase = Phase::Ready;
                self.pings_outstanding = 0;
                vec![Action::Ready]
            }
            (Phase::AwaitingAck | Phase::Ready, ServerOp::Info(body)) => {
                self.on_info_update(&body);
                Vec::new()
            }
            (Phase::Ready, ServerOp::Pong) => {
                self.pings_outstanding = 0;
                Vec::new()
            }
            (Phase::Ready, ServerOp::Ok) => Vec::new(),
            (Phase::Ready, ServerOp::Err(message)) => vec![Action::ServerError(message)],
            (Phase::Ready, ServerOp::Msg(delivery)) => vec![Action::Deliver(delivery)],
            (phase, op) => {
                tracing::debug!(op = op.keyword(), %phase, "unexpected operation during handshake");
                Vec::new()
            }
        }
    }

    /// Advance the keepalive counter for one timer tick.
    pub fn keepalive_tick(&mut self) -> Keepalive {
        if self.phase != Phase::Ready {
            return Keepalive::Idle;
        }
        if self.pings_outstanding >= self.config.max_pings_outstanding {
            return Keepalive::Stale {
                outstanding: self.pings_outstanding,
            };
        }
        self.pings_outstanding += 1;
        Keepalive::Ping
    }

    /// Mark the connection closed.
    ///
    /// Returns the error to report when the close interrupted the handshake.
    pub fn close(&mut self) -> Option<ProtocolError> {
        let phase = std::mem::replace(&mut self.phase, Phase::Closed);
        match phase {
            Phase::AwaitingGreeting | Phase::AwaitingAck => {
                Some(ProtocolError::ClosedDuringHandshake {
                    phase: phase.as_str(),
                })
            }
            Phase::Ready | Phase::Closed => None,
        }
    }

    fn on_greeting(&mut self, body: &str) -> Vec<Action> {
        let info = match ServerInfo::parse(body) {
            Ok(info) => info,
            Err(err) => {
                self.phase = Phase::Closed;
                return vec![Action::HandshakeFailed(ProtocolError::InvalidInfo {
                    reason: err.to_string(),
                })];
            }
        };
        tracing::debug!(
            server_id = %info.server_id,
            version = %info.version,
            auth_required = info.auth_required,
            "received server greeting"
        );
        let connect = ConnectInfo::new(&info, &self.config);
        self.server_info = Some(info);
        self.phase = Phase::AwaitingAck;
        vec![
            Action::Send(ClientOp::Connect(connect)),
            Action::Send(ClientOp::Ping),
        ]
    }

    fn on_info_update(&mut self, body: &str) {
        match ServerInfo::parse(body) {
            Ok(info) => {
                tracing::debug!(server_id = %info.server_id, "server info updated");
                self.server_info = Some(info);
            }
            Err(err) => tracing::warn!(error = %err, "ignoring unparseable INFO update"),
        }
    }
}
