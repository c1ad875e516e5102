//! Span and timing helpers for connector operations.
//!
//! These keep dynamic level selection out of the connector methods.

use std::time::Instant;

use tracing::{Level, Span};

use super::tracing_config::TracingConfig;

/// Create a span at a dynamically selected level.
///
/// Each arm calls the matching `tracing::<level>_span!` macro so the span
/// metadata stays static per branch while the branch choice is dynamic.
macro_rules! dynamic_span {
    ($level:expr, $name:expr $(, $($field:tt)*)?) => {
        match $level {
            Level::ERROR => tracing::error_span!($name $(, $($field)*)?),
            Level::WARN  => tracing::warn_span!($name $(, $($field)*)?),
            Level::INFO  => tracing::info_span!($name $(, $($field)*)?),
            Level::DEBUG => tracing::debug_span!($name $(, $($field)*)?),
            Level::TRACE => tracing::trace_span!($name $(, $($field)*)?),
        }
    };
}

/// Span for a connection attempt.
#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn connect_span(config: &TracingConfig, endpoint: &str) -> Span {
    dynamic_span!(
        config.connect_level,
        "connector.connect",
        endpoint = endpoint,
        result = tracing::field::Empty
    )
}

/// Span for registering a channel subscription.
#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn subscribe_span(config: &TracingConfig, channel: &str, sid: &str) -> Span {
    dynamic_span!(
        config.subscribe_level,
        "connector.subscribe",
        channel = channel,
        sid = sid
    )
}

/// Span for a channel authorisation request.
#[expect(
    clippy::cognitive_complexity,
    reason = "complexity from dynamic_span! macro expansion"
)]
pub(crate) fn authorize_span(config: &TracingConfig, channel: &str) -> Span {
    dynamic_span!(
        config.authorize_level,
        "connector.authorize",
        channel = channel
    )
}

/// Start a timer when timing is enabled.
pub(crate) fn start_timer(enabled: bool) -> Option<Instant> { enabled.then(Instant::now) }

/// Record elapsed time if timing was enabled for this operation.
pub(crate) fn emit_timing_event(start: Option<Instant>) {
    if let Some(start) = start {
        let elapsed_us = start.elapsed().as_micros();
        tracing::debug!(elapsed_us = elapsed_us, "operation.timing");
    }
}
