//! Connection lifecycle states.

use std::fmt;

/// Where the connector is in its connection lifecycle.
///
/// Observed through [`crate::Connector::state`] and
/// [`crate::Connector::state_changes`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport connection and no attempt in progress.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open; waiting for the server greeting and acknowledgement.
    Handshaking,
    /// Handshake complete; subscriptions are live.
    Connected,
    /// A requested disconnect is tearing the connection down.
    Closing,
}

impl ConnectionState {
    /// Lower-case name used in logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_connected(self) -> bool { self == Self::Connected }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
