//! The public connector.
//!
//! [`Connector`] owns one broker connection and the channels multiplexed over
//! it. `connect` opens the transport and waits for the handshake; concurrent
//! callers share a single in-flight attempt. When the connection drops
//! without a requested disconnect, a reconnect is scheduled with exponential
//! backoff and every subscribed channel is replayed once the new handshake
//! completes.
//!
//! Connection lifecycle notifications are delivered to handlers registered
//! with [`Connector::on`]:
//!
//! | Event | Data |
//! |---|---|
//! | `connect`, `connected` | `null` |
//! | `disconnect` | `{"reason": ..}` |
//! | `reconnecting` | `{"attempt": .., "delay_ms": ..}` |
//! | `error` | `{"message": ..}` |
//! | `message` | every delivery's raw payload |
//!
//! Any other name receives deliveries whose formatted event name matches.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use indexmap::IndexMap;
use serde_json::{Value, json};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    auth::{AuthRequest, Authorization, Authorizer},
    backoff::BackoffConfig,
    channel::{
        Channel,
        ChannelHost,
        ChannelKind,
        Listener,
        ListenerTable,
        PresenceChannel,
        PrivateChannel,
        data_listener,
        invoke,
    },
    config::{ConnectorConfig, Endpoints},
    formatter::EventFormatter,
    metrics,
    protocol::{ClientOp, Delivery, ServerInfo, validate_subject},
    registry::SubscriptionRegistry,
    router::{GLOBAL_SCOPE, RouteTarget},
    transport::Transport,
};

mod builder;
mod driver;
mod error;
mod state;
mod tracing_config;
mod tracing_helpers;

pub use builder::ConnectorBuilder;
use driver::Driver;
pub use error::ConnectorError;
pub use state::ConnectionState;
pub use tracing_config::TracingConfig;
use tracing_helpers::{
    authorize_span,
    connect_span,
    emit_timing_event,
    start_timer,
    subscribe_span,
};

/// Handle to a broker connection and its channels.
///
/// Clones share the same connection. Dropping the last handle stops the
/// connection driver.
///
/// # Examples
///
/// ```no_run
/// use echo_nats::{Connector, ConnectorError, config::ConnectorConfig};
///
/// # async fn run() -> Result<(), ConnectorError> {
/// let connector = Connector::new(ConnectorConfig::default().with_host("broker.local"))?;
/// connector
///     .channel("orders")
///     .listen("OrderShipped", |order| println!("shipped: {order}"));
/// connector.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), ConnectorError>>>;

pub(crate) struct Inner {
    config: Arc<ConnectorConfig>,
    endpoints: Endpoints,
    formatter: EventFormatter,
    socket_id: String,
    tracing: TracingConfig,
    backoff: BackoffConfig,
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn Authorizer>,
    session: Mutex<Session>,
    channels: Mutex<IndexMap<String, Channel>>,
    handlers: Mutex<ListenerTable>,
    state: watch::Sender<ConnectionState>,
    lifecycle: Mutex<Lifecycle>,
    weak_self: Weak<Inner>,
}

/// Registry plus the live command queue. The queue is present only while the
/// connection is ready, so a `SUB` is either sent now or replayed later.
#[derive(Default)]
struct Session {
    registry: SubscriptionRegistry,
    link: Option<mpsc::UnboundedSender<ClientOp>>,
}

struct DriverHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    pending: Option<(u64, ConnectAttempt)>,
    attempts_started: u64,
    driver: Option<DriverHandle>,
    generation: u64,
    reconnect_attempts: u32,
    reconnect_enabled: bool,
    close_requested: bool,
    server_info: Option<ServerInfo>,
}

impl Connector {
    /// Build a connector that reaches the broker over WebSockets and
    /// authorises channels over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] when the configuration is unusable.
    pub fn new(config: ConnectorConfig) -> Result<Self, ConnectorError> {
        ConnectorBuilder::new(config).build()
    }

    /// Start building a connector with custom collaborators.
    #[must_use]
    pub fn builder(config: ConnectorConfig) -> ConnectorBuilder { ConnectorBuilder::new(config) }

    fn from_inner(inner: Arc<Inner>) -> Self { Self { inner } }

    /// Open the connection and wait for the handshake.
    ///
    /// Returns at once when already connected. Concurrent calls share one
    /// attempt and all observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Timeout`] when the handshake does not finish
    /// within the connect timeout, [`ConnectorError::Protocol`] when the
    /// server refuses it, and [`ConnectorError::Transport`] when the
    /// transport cannot be opened. A reconnect is scheduled in each case.
    pub async fn connect(&self) -> Result<(), ConnectorError> { self.inner.connect().await }

    /// Close the connection and stop reconnecting.
    ///
    /// Channels and their listeners are kept; the next [`Connector::connect`]
    /// resubscribes them.
    pub async fn disconnect(&self) { self.inner.disconnect().await; }

    /// Plain channel named `name`.
    ///
    /// Repeated calls return handles to the same channel.
    #[must_use]
    pub fn channel(&self, name: &str) -> Channel { self.inner.channel_named(name) }

    /// Private channel `private-<name>`.
    #[must_use]
    pub fn private_channel(&self, name: &str) -> PrivateChannel {
        PrivateChannel::new(self.inner.channel_of(ChannelKind::Private, name))
    }

    /// Encrypted private channel `private-encrypted-<name>`.
    ///
    /// Payloads are passed through as received.
    #[must_use]
    pub fn encrypted_private_channel(&self, name: &str) -> PrivateChannel {
        PrivateChannel::new(self.inner.channel_of(ChannelKind::EncryptedPrivate, name))
    }

    /// Presence channel `presence-<name>`.
    #[must_use]
    pub fn join(&self, name: &str) -> PresenceChannel {
        PresenceChannel::new(self.inner.channel_of(ChannelKind::Presence, name))
    }

    /// Listen for `event` on the plain channel `channel`.
    pub fn listen<F>(&self, channel: &str, event: &str, callback: F) -> Channel
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let channel = self.channel(channel);
        channel.listen(event, callback);
        channel
    }

    /// Leave `name` in every variant: plain, private, encrypted private and
    /// presence.
    pub fn leave(&self, name: &str) {
        for kind in [
            ChannelKind::Plain,
            ChannelKind::Private,
            ChannelKind::EncryptedPrivate,
            ChannelKind::Presence,
        ] {
            self.leave_channel(&format!("{}{name}", kind.prefix()));
        }
    }

    /// Leave exactly the channel named `name`, clearing its listeners and
    /// dropping its subscription.
    ///
    /// Handles to the channel stay usable. Listening on one again subscribes
    /// afresh under a new subscription id.
    pub fn leave_channel(&self, name: &str) {
        let removed = self.inner.channels().shift_remove(name);
        if let Some(channel) = removed {
            tracing::debug!(channel = name, "leaving channel");
            // Replays that run before the UNSUB goes out must skip the channel.
            self.inner.session().registry.mark_unsubscribed(name);
            channel.stop_listening(None, None);
        }
    }

    /// Private notification channel for `user_id`.
    #[must_use]
    pub fn notification(&self, user_id: impl fmt::Display) -> PrivateChannel {
        let name = format!("{}{user_id}", self.inner.config.notification_prefix);
        self.private_channel(&name)
    }

    /// Identifier sent with authorisation requests.
    #[must_use]
    pub fn socket_id(&self) -> &str { &self.inner.socket_id }

    /// Whether the handshake has completed on the current connection.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state().is_connected() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { *self.inner.state.borrow() }

    /// Receiver notified on every lifecycle transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> { self.inner.state.subscribe() }

    /// Capabilities the server announced on the most recent connection.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> { self.inner.lifecycle().server_info.clone() }

    /// Configuration the connector was built with.
    #[must_use]
    pub fn config(&self) -> &ConnectorConfig { &self.inner.config }

    /// Names of the channels currently held, in creation order.
    #[must_use]
    pub fn channels(&self) -> Vec<String> { self.inner.channels().keys().cloned().collect() }

    /// Register a handler for a connection event or a formatted event name.
    pub fn on<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_listener(event, data_listener(callback))
    }

    /// Register a shared [`Listener`] that can later be passed to
    /// [`Connector::off`].
    pub fn on_listener(&self, event: &str, listener: Listener) -> &Self {
        self.inner.handlers().add(event, listener);
        self
    }

    /// Remove handlers for `event`: only `listener` when given, otherwise
    /// all of them.
    pub fn off(&self, event: &str, listener: Option<&Listener>) -> &Self {
        let mut handlers = self.inner.handlers();
        match listener {
            Some(listener) => {
                handlers.remove_callback(event, listener);
            }
            None => {
                handlers.remove_event(event);
            }
        }
        self
    }

    /// Publish `payload` on `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::NotConnected`] when no connection is ready
    /// and [`ConnectorError::Framing`] when `subject` cannot be sent.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<(), ConnectorError> {
        ChannelHost::publish(self.inner.as_ref(), subject, payload.into())
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("endpoint", &self.inner.endpoints.websocket.as_str())
            .field("socket_id", &self.inner.socket_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels(&self) -> MutexGuard<'_, IndexMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> MutexGuard<'_, ListenerTable> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState { *self.state.borrow() }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "connection state changed");
            *current = next;
            true
        });
    }

    /// Invoke global handlers for `event`.
    fn emit(&self, event: &str, data: &Value) {
        let listeners = self.handlers().matching(event);
        invoke(GLOBAL_SCOPE, &listeners, event, data);
    }

    fn channel_named(&self, name: &str) -> Channel {
        let mut channels = self.channels();
        channels
            .entry(name.to_owned())
            .or_insert_with(|| {
                let host: Weak<dyn ChannelHost> = self.weak_self.clone();
                Channel::new(name, self.formatter.clone(), host)
            })
            .clone()
    }

    fn channel_of(&self, kind: ChannelKind, name: &str) -> Channel {
        self.channel_named(&format!("{}{name}", kind.prefix()))
    }

    async fn connect(self: &Arc<Self>) -> Result<(), ConnectorError> {
        let attempt = {
            let mut lifecycle = self.lifecycle();
            lifecycle.reconnect_enabled = true;
            lifecycle.close_requested = false;
            if self.state().is_connected() {
                return Ok(());
            }
            match &lifecycle.pending {
                Some((_, attempt)) => attempt.clone(),
                None => {
                    lifecycle.attempts_started += 1;
                    let id = lifecycle.attempts_started;
                    let attempt = Arc::clone(self).establish(id).boxed().shared();
                    lifecycle.pending = Some((id, attempt.clone()));
                    attempt
                }
            }
        };
        attempt.await
    }

    /// One connection attempt, bounded by the connect timeout.
    async fn establish(self: Arc<Self>, id: u64) -> Result<(), ConnectorError> {
        let span = connect_span(&self.tracing, self.endpoints.websocket.as_str());
        let timer = start_timer(self.tracing.connect_timing);
        let timeout = self.config.connect_timeout;
        let generation = self.lifecycle().generation;

        let result = match tokio::time::timeout(timeout, self.open_and_handshake())
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(_) => {
                let err = ConnectorError::Timeout(timeout);
                self.abandon_attempt(generation, &err);
                Err(err)
            }
        };

        span.record("result", if result.is_ok() { "ok" } else { "error" });
        emit_timing_event(timer);
        if let Err(err) = &result {
            span.in_scope(|| tracing::warn!(error = %err, "connection attempt failed"));
        }

        let mut lifecycle = self.lifecycle();
        if lifecycle.pending.as_ref().is_some_and(|(pending, _)| *pending == id) {
            lifecycle.pending = None;
        }
        result
    }

    async fn open_and_handshake(self: &Arc<Self>) -> Result<(), ConnectorError> {
        self.set_state(ConnectionState::Connecting);
        let link = match self.transport.open(&self.endpoints.websocket).await {
            Ok(link) => link,
            Err(err) => {
                let err = ConnectorError::from(err);
                self.on_connection_lost(None, false, "transport failed to open", Some(&err));
                return Err(err);
            }
        };

        let (ack, handshake) = oneshot::channel();
        {
            let mut lifecycle = self.lifecycle();
            if !lifecycle.reconnect_enabled {
                // disconnect() ran while the transport was opening.
                drop(lifecycle);
                self.set_state(ConnectionState::Disconnected);
                return Err(ConnectorError::Closed);
            }
            lifecycle.generation += 1;
            let cancel = CancellationToken::new();
            let driver = Driver::new(
                Weak::clone(&self.weak_self),
                lifecycle.generation,
                Arc::clone(&self.config),
                cancel.clone(),
                ack,
            );
            self.set_state(ConnectionState::Handshaking);
            let task = tokio::spawn(driver.run(link).in_current_span());
            if let Some(previous) = lifecycle.driver.replace(DriverHandle { cancel, task }) {
                previous.cancel.cancel();
            }
        }

        handshake
            .await
            .unwrap_or_else(|_| Err(ConnectorError::Closed))
    }

    /// Tear down an attempt that timed out. A driver spawned for the attempt
    /// is cancelled and its generation retired, so its own exit report is
    /// ignored as stale and the loss is reported here exactly once.
    fn abandon_attempt(&self, generation_at_start: u64, err: &ConnectorError) {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.generation != generation_at_start {
                if let Some(driver) = lifecycle.driver.take() {
                    driver.cancel.cancel();
                }
                lifecycle.generation += 1;
            }
        }
        self.on_connection_lost(None, false, "connect timed out", Some(err));
    }

    /// Handshake completed on connection `generation`. Returns `false` when
    /// that connection has been superseded.
    fn on_ready(
        &self,
        generation: u64,
        outbound: &mpsc::UnboundedSender<ClientOp>,
        info: ServerInfo,
    ) -> bool {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.generation != generation {
                return false;
            }
            lifecycle.reconnect_attempts = 0;
            lifecycle.server_info = Some(info);
        }
        let replayed = {
            let mut session = self.session();
            session.link = Some(outbound.clone());
            let ops = session.registry.replay_active();
            let count = ops.len();
            for op in ops {
                let _ = outbound.send(op);
            }
            count
        };
        self.set_state(ConnectionState::Connected);
        metrics::inc_connections();
        tracing::info!(
            endpoint = %self.endpoints.websocket,
            subscriptions = replayed,
            "connected"
        );
        self.emit("connect", &Value::Null);
        self.emit("connected", &Value::Null);
        true
    }

    /// Record the loss of a connection and schedule a reconnect when the
    /// close was not requested. `generation` is `None` when no driver was
    /// started.
    fn on_connection_lost(
        &self,
        generation: Option<u64>,
        was_ready: bool,
        reason: &str,
        error: Option<&ConnectorError>,
    ) {
        let schedule = {
            let mut lifecycle = self.lifecycle();
            if generation.is_some_and(|generation| generation != lifecycle.generation) {
                tracing::debug!(reason, "stale connection closed");
                return;
            }
            self.session().link = None;
            let requested = std::mem::take(&mut lifecycle.close_requested);
            if requested || !lifecycle.reconnect_enabled {
                None
            } else if !self.backoff.allows(lifecycle.reconnect_attempts) {
                tracing::warn!(
                    attempts = lifecycle.reconnect_attempts,
                    "reconnect attempts exhausted"
                );
                None
            } else {
                lifecycle.reconnect_attempts += 1;
                let attempt = lifecycle.reconnect_attempts;
                Some((attempt, self.backoff.delay_for(attempt)))
            }
        };

        self.set_state(ConnectionState::Disconnected);
        if was_ready {
            metrics::dec_connections();
        }
        if let Some(err) = error {
            metrics::inc_errors();
            self.emit("error", &json!({ "message": err.to_string() }));
        }
        self.emit("disconnect", &json!({ "reason": reason }));

        if let Some((attempt, delay)) = schedule {
            self.schedule_reconnect(attempt, delay);
        }
    }

    fn schedule_reconnect(&self, attempt: u32, delay: std::time::Duration) {
        metrics::inc_reconnects();
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(attempt, delay_ms, "reconnect scheduled");
        self.emit(
            "reconnecting",
            &json!({ "attempt": attempt, "delay_ms": delay_ms }),
        );

        let weak = Weak::clone(&self.weak_self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let proceed = inner.state() == ConnectionState::Disconnected
                && inner.lifecycle().reconnect_enabled;
            if !proceed {
                tracing::debug!(attempt, "reconnect skipped");
                return;
            }
            if let Err(err) = inner.connect().await {
                tracing::debug!(attempt, error = %err, "reconnect attempt failed");
            }
        });
    }

    async fn disconnect(&self) {
        let driver = {
            let mut lifecycle = self.lifecycle();
            lifecycle.reconnect_enabled = false;
            lifecycle.close_requested = true;
            lifecycle.pending = None;
            lifecycle.driver.take()
        };
        if let Some(driver) = driver {
            self.set_state(ConnectionState::Closing);
            driver.cancel.cancel();
            if let Err(err) = driver.task.await {
                tracing::warn!(error = %err, "connection driver ended abnormally");
            }
        }
        self.lifecycle().close_requested = false;
        self.session().link = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(driver) = lifecycle.driver.take() {
            driver.cancel.cancel();
        }
    }
}

#[async_trait]
impl ChannelHost for Inner {
    async fn authorize(&self, channel: &str) -> Result<Authorization, ConnectorError> {
        let span = authorize_span(&self.tracing, channel);
        let timer = start_timer(self.tracing.authorize_timing);
        let request = AuthRequest {
            channel_name: channel,
            socket_id: &self.socket_id,
        };
        let result = self.authorizer.authorize(request).instrument(span).await;
        emit_timing_event(timer);
        result.map_err(|source| ConnectorError::Auth {
            channel: channel.to_owned(),
            source,
        })
    }

    fn subscribe(
        &self,
        handle: &Channel,
        authorization: Option<&Authorization>,
    ) -> Result<(), ConnectorError> {
        let channel = handle.name();
        validate_subject(channel)?;
        self.channels()
            .entry(channel.to_owned())
            .or_insert_with(|| handle.clone());
        let mut session = self.session();
        let sid = session.registry.register(channel);
        let _span = subscribe_span(&self.tracing, channel, &sid).entered();
        session.registry.mark_subscribed(channel);
        session
            .registry
            .set_authorization(channel, authorization.map(|auth| auth.auth.clone()));
        match (&session.link, session.registry.subscribe_op(channel)) {
            (Some(link), Some(op)) => {
                let _ = link.send(op);
                tracing::debug!("subscribed");
            }
            _ => tracing::debug!("subscription queued until connected"),
        }
        Ok(())
    }

    fn unsubscribe(&self, channel: &str) {
        let mut session = self.session();
        let connected = session.link.is_some();
        let op = session.registry.remove(channel, connected);
        if let (Some(link), Some(op)) = (&session.link, op) {
            let _ = link.send(op);
        }
        tracing::debug!(channel, connected, "unsubscribed");
    }

    fn publish(&self, subject: &str, payload: Bytes) -> Result<(), ConnectorError> {
        validate_subject(subject)?;
        let session = self.session();
        let link = session.link.as_ref().ok_or(ConnectorError::NotConnected)?;
        link.send(ClientOp::Pub {
            subject: subject.to_owned(),
            reply_to: None,
            payload,
        })
        .map_err(|_| ConnectorError::NotConnected)
    }
}

impl RouteTarget for Inner {
    fn global_listeners(&self, event: &str) -> Vec<Listener> { self.handlers().matching(event) }

    fn channel_for(&self, delivery: &Delivery) -> Option<Channel> {
        let by_sid = self
            .session()
            .registry
            .channel_for_sid(&delivery.sid)
            .map(str::to_owned);
        let channels = self.channels();
        by_sid
            .as_deref()
            .and_then(|name| channels.get(name))
            .or_else(|| channels.get(&delivery.subject))
            .cloned()
    }
}

#[cfg(test)]
mod tests;
