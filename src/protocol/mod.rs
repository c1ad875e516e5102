//! Wire operations and the connection handshake.
//!
//! [`ServerOp`] and [`ClientOp`] are the decoded and encodable forms of the
//! broker's text protocol. [`ProtocolMachine`] consumes server operations and
//! emits [`Action`]s for the connection driver without touching any I/O.

mod info;
mod machine;
mod ops;

pub use info::{CLIENT_LANG, ConnectInfo, PROTOCOL_REVISION, ServerInfo};
pub use machine::{Action, Keepalive, Phase, ProtocolMachine};
pub use ops::{ClientOp, Delivery, ServerOp, validate_subject};
