//! Utilities for exercising an [`echo_nats::Connector`] against a scripted
//! broker during tests.
//!
//! [`MockServer`] sits on the far side of an in-memory transport and plays
//! the server half of the protocol one line at a time, so tests can assert
//! on exactly which commands the connector wrote.
//!
//! ```rust,no_run
//! use echo_nats::{Connector, config::ConnectorConfig};
//! use echo_nats_testing::MockServer;
//!
//! # async fn example() {
//! let (transport, mut server) = MockServer::new();
//! let connector = Connector::builder(ConnectorConfig::default())
//!     .transport(transport)
//!     .build()
//!     .unwrap();
//! let (result, _conn) = tokio::join!(connector.connect(), server.accept_ready());
//! result.unwrap();
//! # }
//! ```

pub mod logging;
pub mod server;

pub use logging::{LoggerHandle, logger};
pub use server::{DEFAULT_WAIT, MockConnection, MockServer};
