//! Byte-stream transports.
//!
//! The connector needs an ordered, reliable, bidirectional byte stream and
//! nothing else. [`Transport::open`] produces a [`TransportLink`]: a sink for
//! outgoing command bytes and a stream of incoming chunks. Chunk boundaries
//! carry no meaning; the frame decoder reassembles protocol lines itself.
//!
//! [`WebSocketTransport`] speaks to a broker's WebSocket listener.
//! [`memory`] provides an in-process pair for tests and embedding.

use std::{fmt, io, pin::Pin};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

pub mod memory;

/// Outgoing half of a transport connection.
pub type ByteSink = Pin<Box<dyn Sink<Bytes, Error = io::Error> + Send>>;
/// Incoming half of a transport connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// An open transport connection.
pub struct TransportLink {
    /// Bytes written to the server.
    pub sink: ByteSink,
    /// Chunks received from the server. The stream ends when the peer
    /// closes the connection.
    pub stream: ByteStream,
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Opens connections to the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that prevented the connection from opening.
    async fn open(&self, endpoint: &Url) -> io::Result<TransportLink>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
///
/// Commands are sent as binary frames. Incoming binary and text frames are
/// both passed on as raw bytes; control frames are handled by tungstenite.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &Url) -> io::Result<TransportLink> {
        let (socket, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(into_io)?;
        tracing::debug!(endpoint = %endpoint, "websocket opened");
        let (sink, stream) = socket.split();

        let sink = sink
            .with(|bytes: Bytes| future::ready(Ok::<_, tungstenite::Error>(Message::Binary(bytes.to_vec()))))
            .sink_map_err(into_io);

        let stream = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(Message::Text(text)) => Some(Ok(Bytes::from(text))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket close frame received");
                    None
                }
                Ok(_) => None,
                Err(err) => Some(Err(into_io(err))),
            })
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn into_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(inner) => inner,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::BrokenPipe, err)
        }
        other => io::Error::other(other),
    }
}
