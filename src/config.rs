//! Connector configuration.
//!
//! [`ConnectorConfig`] gathers every recognised option in one place. It can
//! be deserialised from TOML (all fields are optional and fall back to the
//! defaults below) or assembled with the `with_*` builder methods.
//!
//! Ambient values that a browser host would discover on its own, such as the
//! CSRF token or the page's hostname, are plain inputs here. They are read
//! once when the connector is built and never looked up again.
//!
//! | Option                   | Default               |
//! |--------------------------|-----------------------|
//! | `host`                   | `127.0.0.1`           |
//! | `port`                   | `8080`                |
//! | `ws_path`                | `/`                   |
//! | `auth_endpoint`          | `/broadcasting/auth`  |
//! | `namespace`              | `App.Events`          |
//! | `connect_timeout`        | `10s`                 |
//! | `max_reconnect_attempts` | `10`                  |
//! | `reconnect_delay`        | `3s`                  |
//! | `keepalive_interval`     | `30s`                 |
//! | `max_pings_outstanding`  | `2`                   |

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::backoff::BackoffConfig;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was requested.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The configuration text was not valid TOML for [`ConnectorConfig`].
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An endpoint could not be assembled into a URL.
    #[error("invalid {endpoint} endpoint `{value}`: {source}")]
    Url {
        /// Which endpoint failed, `websocket` or `auth`.
        endpoint: &'static str,
        /// The text that failed to parse.
        value: String,
        /// Parser diagnostics.
        source: url::ParseError,
    },

    /// An option held a value the connector cannot use.
    #[error("invalid option `{option}`: {reason}")]
    Invalid {
        /// Option name.
        option: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Extra data sent with every channel authorisation request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthOptions {
    /// HTTP headers added to the request.
    pub headers: BTreeMap<String, String>,
    /// Fields merged into the JSON request body.
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Options recognised by the connector.
#[expect(
    clippy::struct_excessive_bools,
    reason = "independent protocol and diagnostic switches"
)]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Broker host name.
    pub host: String,
    /// Broker WebSocket port.
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Use `wss://` and `https://`.
    pub tls: bool,
    /// Authorisation endpoint, absolute or relative to [`Self::auth_origin`].
    pub auth_endpoint: String,
    /// Origin used to resolve a relative `auth_endpoint`. Defaults to the
    /// broker host.
    pub auth_origin: Option<String>,
    /// Namespace prefixed to event names; empty disables prefixing.
    pub namespace: String,
    /// Username sent when the server requires authentication.
    pub user: Option<String>,
    /// Password sent when the server requires authentication.
    pub pass: Option<String>,
    /// Bearer token sent when the server requires authentication.
    pub token: Option<String>,
    /// Time allowed for the transport to open and the handshake to finish.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnect back-off.
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Interval between client `PING`s.
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,
    /// Unanswered `PING`s tolerated before the connection counts as stale.
    pub max_pings_outstanding: u32,
    /// Emit connector spans at `INFO`.
    pub debug: bool,
    /// Ask the server to acknowledge every command.
    pub verbose: bool,
    /// Ask the server for strict subject checking.
    pub pedantic: bool,
    /// Receive our own publishes.
    pub echo: bool,
    /// Authorisation request customisation.
    pub auth: AuthOptions,
    /// CSRF token sent as `X-CSRF-TOKEN` with authorisation requests.
    pub csrf_token: Option<String>,
    /// Client name advertised in the handshake.
    pub client_name: String,
    /// Channel prefix for per-user notification channels.
    pub notification_prefix: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            ws_path: "/".to_owned(),
            tls: false,
            auth_endpoint: "/broadcasting/auth".to_owned(),
            auth_origin: None,
            namespace: "App.Events".to_owned(),
            user: None,
            pass: None,
            token: None,
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(3000),
            keepalive_interval: Duration::from_secs(30),
            max_pings_outstanding: 2,
            debug: false,
            verbose: false,
            pedantic: false,
            echo: false,
            auth: AuthOptions::default(),
            csrf_token: None,
            client_name: env!("CARGO_PKG_NAME").to_owned(),
            notification_prefix: "App.Models.User.".to_owned(),
        }
    }
}

/// Fully resolved endpoints, computed once when the connector is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// Broker WebSocket URL.
    pub websocket: Url,
    /// Channel authorisation URL.
    pub auth: Url,
}

impl ConnectorConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when `text` is not valid TOML or holds a
    /// value of the wrong type.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use echo_nats::config::ConnectorConfig;
    ///
    /// let config = ConnectorConfig::from_toml_str(
    ///     r#"
    ///     host = "broker.internal"
    ///     connect_timeout = "2s"
    ///
    ///     [auth.headers]
    ///     Authorization = "Bearer abc"
    ///     "#,
    /// )
    /// .unwrap();
    /// assert_eq!(config.host, "broker.internal");
    /// assert_eq!(config.connect_timeout, Duration::from_secs(2));
    /// assert_eq!(config.namespace, "App.Events");
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> { Ok(toml::from_str(text)?) }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read and
    /// [`ConfigError::Parse`] when its contents are invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check option values and resolve both endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unusable values and
    /// [`ConfigError::Url`] when an endpoint does not form a valid URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use echo_nats::config::ConnectorConfig;
    ///
    /// let endpoints = ConnectorConfig::default()
    ///     .with_host("example.com")
    ///     .with_port(443)
    ///     .with_tls(true)
    ///     .with_ws_path("nats")
    ///     .endpoints()
    ///     .unwrap();
    /// assert_eq!(endpoints.websocket.as_str(), "wss://example.com/nats");
    /// assert_eq!(endpoints.auth.as_str(), "https://example.com/broadcasting/auth");
    /// ```
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                option: "host",
                reason: "must not be empty",
            });
        }
        if self.max_pings_outstanding == 0 {
            return Err(ConfigError::Invalid {
                option: "max_pings_outstanding",
                reason: "must be at least 1",
            });
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::Invalid {
                option: "keepalive_interval",
                reason: "must be non-zero",
            });
        }

        let (ws_scheme, http_scheme) = if self.tls { ("wss", "https") } else { ("ws", "http") };
        let path = self.ws_path.trim_start_matches('/');
        let websocket = format!("{ws_scheme}://{}:{}/{path}", self.host, self.port);
        let websocket = parse_url("websocket", &websocket)?;

        let auth = if let Ok(absolute) = Url::parse(&self.auth_endpoint) {
            absolute
        } else {
            let origin = self
                .auth_origin
                .clone()
                .unwrap_or_else(|| format!("{http_scheme}://{}:{}", self.host, self.port));
            parse_url("auth", &origin)?
                .join(&self.auth_endpoint)
                .map_err(|source| ConfigError::Url {
                    endpoint: "auth",
                    value: self.auth_endpoint.clone(),
                    source,
                })?
        };

        Ok(Endpoints { websocket, auth })
    }

    /// Back-off policy derived from the reconnect options.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: self.reconnect_delay,
            max_attempts: self.max_reconnect_attempts,
            ..BackoffConfig::default()
        }
        .normalized()
    }

    /// Set the broker host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the broker port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the WebSocket path.
    #[must_use]
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Enable or disable TLS.
    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the authorisation endpoint.
    #[must_use]
    pub fn with_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = endpoint.into();
        self
    }

    /// Set the origin a relative authorisation endpoint resolves against.
    #[must_use]
    pub fn with_auth_origin(mut self, origin: impl Into<String>) -> Self {
        self.auth_origin = Some(origin.into());
        self
    }

    /// Set the event namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the username.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    #[must_use]
    pub fn with_pass(mut self, pass: impl Into<String>) -> Self {
        self.pass = Some(pass.into());
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum number of reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the base reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the keepalive interval.
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the number of unanswered pings tolerated.
    #[must_use]
    pub fn with_max_pings_outstanding(mut self, pings: u32) -> Self {
        self.max_pings_outstanding = pings;
        self
    }

    /// Enable or disable debug spans.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enable or disable verbose acknowledgements.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Enable or disable delivery of our own publishes.
    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Add a header to authorisation requests.
    #[must_use]
    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth.headers.insert(name.into(), value.into());
        self
    }

    /// Add a field to authorisation request bodies.
    #[must_use]
    pub fn with_auth_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.auth.params.insert(name.into(), value.into());
        self
    }

    /// Set the CSRF token.
    #[must_use]
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Set the client name advertised in the handshake.
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set the notification channel prefix.
    #[must_use]
    pub fn with_notification_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.notification_prefix = prefix.into();
        self
    }
}

fn parse_url(endpoint: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url {
        endpoint,
        value: value.to_owned(),
        source,
    })
}
