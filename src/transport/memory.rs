//! In-process transport.
//!
//! [`channel`] returns a [`MemoryTransport`] for the connector and a
//! [`MemoryAcceptor`] for the other side. Every [`Transport::open`] call
//! hands a fresh [`MemoryPeer`] to the acceptor, which plays the server.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    SinkExt,
    StreamExt,
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use url::Url;

use super::{Transport, TransportLink};

/// Create a connected transport/acceptor pair.
///
/// ```
/// use echo_nats::transport::memory;
///
/// let (transport, mut acceptor) = memory::channel();
/// # let _ = (&transport, &mut acceptor);
/// ```
#[must_use]
pub fn channel() -> (MemoryTransport, MemoryAcceptor) {
    let (tx, rx) = mpsc::unbounded();
    (MemoryTransport { peers: tx }, MemoryAcceptor { peers: rx })
}

/// Client side of an in-memory transport.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    peers: UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &Url) -> io::Result<TransportLink> {
        let (to_client, from_server) = mpsc::unbounded::<io::Result<Bytes>>();
        let (to_server, from_client) = mpsc::unbounded::<Bytes>();
        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            outbound: to_client,
            inbound: from_client,
        };
        self.peers.unbounded_send(peer).map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "memory acceptor dropped")
        })?;

        let sink = to_server
            .sink_map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory peer closed"));
        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(from_server),
        })
    }
}

/// Server side of an in-memory transport; yields one peer per connection.
#[derive(Debug)]
pub struct MemoryAcceptor {
    peers: UnboundedReceiver<MemoryPeer>,
}

impl MemoryAcceptor {
    /// Wait for the next connection. Returns `None` once every
    /// [`MemoryTransport`] has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> { self.peers.next().await }

    /// Take a connection that is already waiting, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> { self.peers.try_next().ok().flatten() }
}

/// One accepted in-memory connection, seen from the server.
#[derive(Debug)]
pub struct MemoryPeer {
    endpoint: Url,
    outbound: UnboundedSender<io::Result<Bytes>>,
    inbound: UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Endpoint the client asked for.
    #[must_use]
    pub fn endpoint(&self) -> &Url { &self.endpoint }

    /// Send raw bytes to the client.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::BrokenPipe`] when the client side is gone.
    pub fn send(&self, bytes: impl Into<Bytes>) -> io::Result<()> {
        self.outbound
            .unbounded_send(Ok(bytes.into()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client closed"))
    }

    /// Fail the client's stream with `err`.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::BrokenPipe`] when the client side is gone.
    pub fn fail(&self, err: io::Error) -> io::Result<()> {
        self.outbound
            .unbounded_send(Err(err))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client closed"))
    }

    /// Next chunk written by the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Bytes> { self.inbound.next().await }

    /// A chunk the client already wrote, without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> { self.inbound.try_next().ok().flatten() }

    /// End the client's stream cleanly.
    pub fn close(&self) { self.outbound.close_channel(); }
}
