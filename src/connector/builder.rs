//! Builder for [`Connector`].

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use rand::Rng;
use tokio::sync::watch;

use super::{Connector, ConnectorError, Inner, Lifecycle, Session, TracingConfig};
use crate::{
    auth::{Authorizer, HttpAuthorizer},
    channel::ListenerTable,
    config::ConnectorConfig,
    formatter::EventFormatter,
    transport::{Transport, WebSocketTransport},
};

/// Builder for [`Connector`].
///
/// Defaults to [`WebSocketTransport`] and an [`HttpAuthorizer`] posting to
/// the configured authorisation endpoint.
///
/// # Examples
///
/// ```
/// use echo_nats::{Connector, config::ConnectorConfig, transport::memory};
///
/// let (transport, _acceptor) = memory::channel();
/// let connector = Connector::builder(ConnectorConfig::default())
///     .transport(transport)
///     .socket_id("1234.5678")
///     .build()
///     .unwrap();
/// assert_eq!(connector.socket_id(), "1234.5678");
/// ```
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    transport: Option<Arc<dyn Transport>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    tracing: Option<TracingConfig>,
    socket_id: Option<String>,
}

impl ConnectorBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            transport: None,
            authorizer: None,
            tracing: None,
            socket_id: None,
        }
    }

    /// Use `transport` instead of WebSockets.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use `authorizer` instead of the HTTP endpoint.
    #[must_use]
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Override span levels and timing. Defaults follow the `debug` option.
    #[must_use]
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = Some(tracing);
        self
    }

    /// Use a fixed socket id instead of a random one.
    #[must_use]
    pub fn socket_id(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }

    /// Resolve endpoints and create the connector. No connection is opened.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] when the configuration is invalid
    /// or the default authoriser cannot be created.
    pub fn build(self) -> Result<Connector, ConnectorError> {
        let endpoints = self.config.endpoints()?;
        let authorizer = match self.authorizer {
            Some(authorizer) => authorizer,
            None => Arc::new(
                HttpAuthorizer::new(
                    endpoints.auth.clone(),
                    &self.config.auth,
                    self.config.csrf_token.as_deref(),
                )
                .map_err(|err| ConnectorError::Config(err.to_string()))?,
            ),
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport));
        let tracing = self
            .tracing
            .unwrap_or_else(|| TracingConfig::for_debug(self.config.debug));
        let socket_id = self.socket_id.unwrap_or_else(random_socket_id);
        let formatter = EventFormatter::new(self.config.namespace.as_str());
        let backoff = self.config.backoff();
        let (state, _) = watch::channel(super::ConnectionState::Disconnected);

        tracing::debug!(
            endpoint = %endpoints.websocket,
            auth = %endpoints.auth,
            namespace = formatter.namespace(),
            "connector built"
        );

        let inner = Arc::new_cyclic(|weak_self| Inner {
            config: Arc::new(self.config),
            endpoints,
            formatter,
            socket_id,
            tracing,
            backoff,
            transport,
            authorizer,
            session: Mutex::new(Session::default()),
            channels: Mutex::new(IndexMap::new()),
            handlers: Mutex::new(ListenerTable::new()),
            state,
            lifecycle: Mutex::new(Lifecycle::default()),
            weak_self: weak_self.clone(),
        });
        Ok(Connector::from_inner(inner))
    }
}

/// Random `<digits>.<digits>` id in the shape broadcasting servers issue.
fn random_socket_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}.{}",
        rng.gen_range(1..=u32::MAX),
        rng.gen_range(1..=u32::MAX)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_ids_have_two_numeric_parts() {
        let id = random_socket_id();
        let (left, right) = id.split_once('.').expect("dot separator");
        assert!(left.parse::<u32>().is_ok());
        assert!(right.parse::<u32>().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = ConnectorBuilder::new(ConnectorConfig::default().with_host(" "))
            .build()
            .expect_err("empty host");
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn builds_without_runtime() {
        let connector = Connector::new(ConnectorConfig::default()).expect("connector");
        assert!(!connector.is_connected());
        assert_eq!(
            connector.config().namespace,
            ConnectorConfig::default().namespace
        );
    }
}
