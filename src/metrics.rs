//! Metric helpers for `echo-nats`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking live broker connections.
pub const CONNECTIONS_ACTIVE: &str = "echo_nats_connections_active";
/// Name of the counter tracking protocol operations.
pub const FRAMES_PROCESSED: &str = "echo_nats_frames_processed_total";
/// Name of the counter tracking scheduled reconnects.
pub const RECONNECTS_TOTAL: &str = "echo_nats_reconnects_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "echo_nats_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Operations decoded from the server.
    Inbound,
    /// Commands written to the server.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "labels only feed metrics"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables, reason = "no-op build"))]
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
}

/// Record a scheduled reconnect.
pub fn inc_reconnects() {
    #[cfg(feature = "metrics")]
    counter!(RECONNECTS_TOTAL).increment(1);
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
