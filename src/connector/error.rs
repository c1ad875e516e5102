//! Error types for connector operations.

use std::{io, sync::Arc, time::Duration};

use crate::{
    auth::AuthError,
    codec::{FramingError, ProtocolError},
    config::ConfigError,
};

/// Errors emitted by [`crate::Connector`] and its channels.
///
/// The type is `Clone` so one failed connection attempt can be reported to
/// every caller awaiting it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The connection attempt did not complete within the connect timeout.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure while opening or using the connection.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// The server rejected the handshake or sent an unusable greeting.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A subject or command could not be written on the wire.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Authorising a private or presence channel failed.
    #[error("authorisation failed for `{channel}`: {source}")]
    Auth {
        /// Channel that could not be authorised.
        channel: String,
        /// Underlying failure.
        source: AuthError,
    },

    /// The connection was closed before the operation completed.
    #[error("connection closed")]
    Closed,

    /// The operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// The configuration cannot produce a working connector.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for ConnectorError {
    fn from(err: io::Error) -> Self { Self::Transport(Arc::new(err)) }
}

impl From<ConfigError> for ConnectorError {
    fn from(err: ConfigError) -> Self { Self::Config(err.to_string()) }
}

impl ConnectorError {
    /// Whether the failure is worth another connection attempt.
    ///
    /// Configuration problems and authorisation rejections are permanent;
    /// everything else may succeed after a reconnect.
    #[must_use]
    pub fn is_transient(&self) -> bool { !matches!(self, Self::Config(_) | Self::Auth { .. }) }
}
