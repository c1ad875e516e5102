//! Panic isolation for listener callbacks.
//!
//! A listener that panics must not take down its siblings or the connection
//! driver. [`catch_listener`] runs a callback under
//! [`std::panic::catch_unwind`] and [`format_panic`] renders the payload for
//! the log line.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use echo_nats::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Run `callback`, logging and swallowing any panic.
///
/// Returns `false` when the callback panicked.
///
/// ```
/// use echo_nats::panic::catch_listener;
///
/// assert!(catch_listener("orders", "Created", || {}));
/// assert!(!catch_listener("orders", "Created", || panic!("listener bug")));
/// ```
pub fn catch_listener(channel: &str, event: &str, callback: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                channel,
                event,
                panic = %format_panic(payload),
                "listener panicked"
            );
            crate::metrics::inc_errors();
            false
        }
    }
}
