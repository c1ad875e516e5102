//! Tracing configuration for connector operations.
//!
//! [`TracingConfig`] controls the level of the spans wrapped around
//! connection attempts, channel subscriptions and authorisation requests,
//! and whether their elapsed time is recorded.

use tracing::Level;

/// Controls tracing span levels and per-operation timing.
///
/// By default `connect` spans are emitted at `INFO` and the higher-frequency
/// `subscribe` and `authorize` spans at `DEBUG`. Timing is off.
///
/// # Examples
///
/// ```
/// use echo_nats::connector::TracingConfig;
/// use tracing::Level;
///
/// let config = TracingConfig::default()
///     .with_subscribe_level(Level::TRACE)
///     .with_connect_timing(true);
/// let _ = config;
/// ```
#[derive(Clone, Debug)]
pub struct TracingConfig {
    pub(crate) connect_level: Level,
    pub(crate) subscribe_level: Level,
    pub(crate) authorize_level: Level,
    pub(crate) connect_timing: bool,
    pub(crate) authorize_timing: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            connect_level: Level::INFO,
            subscribe_level: Level::DEBUG,
            authorize_level: Level::DEBUG,
            connect_timing: false,
            authorize_timing: false,
        }
    }
}

impl TracingConfig {
    /// Configuration matching the connector's `debug` option: every span at
    /// `INFO` with timing enabled.
    #[must_use]
    pub fn for_debug(debug: bool) -> Self {
        if debug {
            Self::default()
                .with_all_levels(Level::INFO)
                .with_all_timing(true)
        } else {
            Self::default()
        }
    }

    /// Set the tracing level for `connect`.
    #[must_use]
    pub fn with_connect_level(mut self, level: Level) -> Self {
        self.connect_level = level;
        self
    }

    /// Enable or disable timing for `connect`.
    #[must_use]
    pub fn with_connect_timing(mut self, enabled: bool) -> Self {
        self.connect_timing = enabled;
        self
    }

    /// Set the tracing level for channel subscriptions.
    #[must_use]
    pub fn with_subscribe_level(mut self, level: Level) -> Self {
        self.subscribe_level = level;
        self
    }

    /// Set the tracing level for authorisation requests.
    #[must_use]
    pub fn with_authorize_level(mut self, level: Level) -> Self {
        self.authorize_level = level;
        self
    }

    /// Enable or disable timing for authorisation requests.
    #[must_use]
    pub fn with_authorize_timing(mut self, enabled: bool) -> Self {
        self.authorize_timing = enabled;
        self
    }

    /// Set the tracing level for all operations at once.
    #[must_use]
    pub fn with_all_levels(mut self, level: Level) -> Self {
        self.connect_level = level;
        self.subscribe_level = level;
        self.authorize_level = level;
        self
    }

    /// Enable or disable timing for all operations at once.
    #[must_use]
    pub fn with_all_timing(mut self, enabled: bool) -> Self {
        self.connect_timing = enabled;
        self.authorize_timing = enabled;
        self
    }
}
