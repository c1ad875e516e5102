//! Per-connection driver task.
//!
//! One driver owns one transport connection. It feeds received chunks through
//! a fresh [`FrameDecoder`] and [`ProtocolMachine`], writes every command
//! queued on its outbound channel, and ticks the keepalive timer. The driver
//! holds only a weak reference to the connector so dropping the last
//! [`Connector`](super::Connector) handle lets the task wind down.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{codec::Encoder, sync::CancellationToken};

use super::{ConnectorError, Inner};
use crate::{
    codec::{FrameDecoder, NatsCodec},
    config::ConnectorConfig,
    metrics::{self, Direction},
    protocol::{Action, ClientOp, Keepalive, ProtocolMachine},
    router,
    transport::{ByteSink, TransportLink},
};

/// Completion of the handshake, reported to the pending connect attempt.
pub(super) type HandshakeAck = oneshot::Sender<Result<(), ConnectorError>>;

/// Why the driver loop ended.
#[derive(Debug)]
enum Exit {
    /// A requested disconnect or a timed-out attempt cancelled the driver.
    Cancelled,
    /// The server closed the stream.
    Eof,
    /// The transport failed.
    Failed(ConnectorError),
    /// Too many keepalive pings went unanswered.
    Stale(u32),
    /// The handshake was refused; the pending attempt has been told.
    HandshakeFailed,
    /// A newer connection replaced this one, or the connector was dropped.
    Superseded,
}

impl Exit {
    fn reason(&self) -> String {
        match self {
            Self::Cancelled => "cancelled".to_owned(),
            Self::Eof => "closed by server".to_owned(),
            Self::Failed(err) => err.to_string(),
            Self::Stale(outstanding) => format!("{outstanding} pings unanswered"),
            Self::HandshakeFailed => "handshake failed".to_owned(),
            Self::Superseded => "superseded".to_owned(),
        }
    }

    fn error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

pub(super) struct Driver {
    inner: Weak<Inner>,
    generation: u64,
    config: Arc<ConnectorConfig>,
    cancel: CancellationToken,
    ack: Option<HandshakeAck>,
}

impl Driver {
    pub(super) fn new(
        inner: Weak<Inner>,
        generation: u64,
        config: Arc<ConnectorConfig>,
        cancel: CancellationToken,
        ack: HandshakeAck,
    ) -> Self {
        Self {
            inner,
            generation,
            config,
            cancel,
            ack: Some(ack),
        }
    }

    /// Drive `link` until it closes, then report the loss.
    pub(super) async fn run(mut self, link: TransportLink) {
        let TransportLink {
            mut sink,
            mut stream,
        } = link;
        let cancel = self.cancel.clone();
        let mut machine = ProtocolMachine::new(Arc::clone(&self.config));
        let mut decoder = FrameDecoder::new();
        let mut codec = NatsCodec::new();
        let (outbound, mut queued) = mpsc::unbounded_channel::<ClientOp>();
        let mut keepalive = keepalive_timer(self.config.keepalive_interval);
        let mut ready = false;

        let exit = 'conn: loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break Exit::Cancelled,

                Some(op) = queued.recv() => {
                    if let Err(err) = write(&mut sink, &mut codec, op).await {
                        break Exit::Failed(err);
                    }
                }

                chunk = stream.next() => {
                    let bytes = match chunk {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(err)) => break Exit::Failed(err.into()),
                        None => break Exit::Eof,
                    };
                    let was_ready = ready;
                    for op in decoder.feed(&bytes) {
                        for action in machine.handle(op) {
                            if let Some(exit) = self.execute(action, &machine, &outbound, &mut ready) {
                                break 'conn exit;
                            }
                        }
                    }
                    if ready && !was_ready {
                        // Keepalive periods count from the end of the handshake.
                        keepalive.reset();
                    }
                }

                _ = keepalive.tick() => match machine.keepalive_tick() {
                    Keepalive::Ping => {
                        // Queued rather than written so commands keep their order.
                        let _ = outbound.send(ClientOp::Ping);
                    }
                    Keepalive::Stale { outstanding } => break Exit::Stale(outstanding),
                    Keepalive::Idle => {}
                },
            }
        };

        if let Err(err) = sink.close().await {
            tracing::debug!(error = %err, "transport close failed");
        }
        let interrupted = machine.close();
        decoder.reset();

        if let Some(ack) = self.ack.take() {
            let err = match &exit {
                Exit::Failed(err) => err.clone(),
                _ => interrupted.map_or(ConnectorError::Closed, ConnectorError::Protocol),
            };
            let _ = ack.send(Err(err));
        }

        tracing::debug!(reason = %exit.reason(), ready, "connection closed");
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connection_lost(Some(self.generation), ready, &exit.reason(), exit.error());
        }
    }

    /// Carry out one state machine action. Returns the exit when the
    /// connection must close.
    fn execute(
        &mut self,
        action: Action,
        machine: &ProtocolMachine,
        outbound: &mpsc::UnboundedSender<ClientOp>,
        ready: &mut bool,
    ) -> Option<Exit> {
        match action {
            Action::Send(op) => {
                let _ = outbound.send(op);
                None
            }
            Action::Ready => {
                let Some(inner) = self.inner.upgrade() else {
                    return Some(Exit::Superseded);
                };
                let info = machine.server_info().cloned().unwrap_or_default();
                if !inner.on_ready(self.generation, outbound, info) {
                    return Some(Exit::Superseded);
                }
                *ready = true;
                if let Some(ack) = self.ack.take() {
                    let _ = ack.send(Ok(()));
                }
                None
            }
            Action::Deliver(delivery) => {
                let Some(inner) = self.inner.upgrade() else {
                    return Some(Exit::Superseded);
                };
                router::route(inner.as_ref(), &inner.formatter, &delivery);
                None
            }
            Action::ServerError(message) => {
                tracing::warn!(message = %message, "server reported an error");
                metrics::inc_errors();
                if let Some(inner) = self.inner.upgrade() {
                    inner.emit("error", &json!({ "message": message }));
                }
                None
            }
            Action::HandshakeFailed(err) => {
                tracing::warn!(error = %err, "handshake failed");
                metrics::inc_errors();
                if let Some(inner) = self.inner.upgrade() {
                    inner.emit("error", &json!({ "message": err.to_string() }));
                }
                if let Some(ack) = self.ack.take() {
                    let _ = ack.send(Err(ConnectorError::Protocol(err)));
                }
                Some(Exit::HandshakeFailed)
            }
        }
    }
}

fn keepalive_timer(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn write(
    sink: &mut ByteSink,
    codec: &mut NatsCodec,
    op: ClientOp,
) -> Result<(), ConnectorError> {
    let mut buf = BytesMut::new();
    if let Err(err) = codec.encode(op, &mut buf) {
        tracing::warn!(error = %err, "dropping command that cannot be encoded");
        metrics::inc_errors();
        return Ok(());
    }
    metrics::inc_frames(Direction::Outbound);
    sink.send(buf.freeze()).await?;
    Ok(())
}
