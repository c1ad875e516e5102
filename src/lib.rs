#![doc(html_root_url = "https://docs.rs/echo-nats/latest")]
//! Public API for the `echo-nats` library.
//!
//! This crate connects a broadcasting front end to a broker speaking the
//! NATS text protocol over a WebSocket. It provides the frame decoder and
//! protocol state machine, a subscription registry that survives
//! reconnects, typed channels with listener tables, and the router tying
//! deliveries to channels.
//!
//! Start with [`Connector`].

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connector;
pub mod formatter;
pub mod metrics;
pub mod panic;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;

pub use channel::{Channel, PresenceChannel, PrivateChannel};
pub use connector::{ConnectionState, Connector, ConnectorBuilder, ConnectorError};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED, RECONNECTS_TOTAL};
