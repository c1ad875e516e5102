//! Channels and their listeners.
//!
//! Every channel shares one implementation, [`Channel`], tagged with a
//! [`ChannelKind`]. Private and presence behaviour is exposed through typed
//! wrappers ([`PrivateChannel`], [`PresenceChannel`]) and the capability
//! traits [`Subscribable`], [`Whisperable`] and [`PresenceAware`].
//!
//! A channel moves through `Unsubscribed → Subscribing → Subscribed`. The
//! first listener registered on a channel starts a subscription. Private
//! kinds authorise first, and an unsubscribe that lands while authorisation
//! is still in flight cancels the pending `SUB`.
//!
//! Event names passed to [`Channel::listen`] are namespaced with the
//! connector's formatter. A leading `.` or `\` marks a name as absolute: the
//! marker is stripped and the rest is used verbatim.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use crate::{ConnectorError, auth::Authorization, formatter::EventFormatter};

mod listeners;
pub mod presence;
mod private;

pub use listeners::{Listener, ListenerTable, WILDCARD, listener};
pub(crate) use listeners::{data_listener, invoke};
pub use presence::{Members, PresenceChannel};
pub use private::{NOTIFICATION_EVENT, PrivateChannel};

/// Triggered after the channel's `SUB` has been issued.
pub const SUBSCRIPTION_SUCCEEDED: &str = "subscription:succeeded";
/// Triggered when authorising the channel fails.
pub const SUBSCRIPTION_ERROR: &str = "subscription:error";

/// Channel variants, distinguished by name prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Public channel; subscribes without authorisation.
    Plain,
    /// `private-` channel.
    Private,
    /// `private-encrypted-` channel.
    EncryptedPrivate,
    /// `presence-` channel with membership tracking.
    Presence,
}

impl ChannelKind {
    /// Name prefix for this kind.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Plain => "",
            Self::Private => "private-",
            Self::EncryptedPrivate => "private-encrypted-",
            Self::Presence => "presence-",
        }
    }

    /// Classify a full channel name by its prefix.
    ///
    /// ```
    /// use echo_nats::channel::ChannelKind;
    ///
    /// assert_eq!(ChannelKind::of("orders"), ChannelKind::Plain);
    /// assert_eq!(ChannelKind::of("private-encrypted-x"), ChannelKind::EncryptedPrivate);
    /// assert_eq!(ChannelKind::of("presence-room.1"), ChannelKind::Presence);
    /// ```
    #[must_use]
    pub fn of(name: &str) -> Self {
        [Self::EncryptedPrivate, Self::Private, Self::Presence]
            .into_iter()
            .find(|kind| name.starts_with(kind.prefix()))
            .unwrap_or(Self::Plain)
    }

    /// Whether subscribing requires an authorisation round-trip.
    #[must_use]
    pub fn requires_authorization(self) -> bool { self != Self::Plain }
}

/// Subscription progress of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// No subscription requested.
    Unsubscribed,
    /// Authorising or about to send `SUB`.
    Subscribing,
    /// `SUB` issued; replayed after every reconnect.
    Subscribed,
}

/// Services a channel needs from its connector.
#[async_trait]
pub(crate) trait ChannelHost: Send + Sync {
    /// Obtain an authorisation for `channel`.
    async fn authorize(&self, channel: &str) -> Result<Authorization, ConnectorError>;

    /// Register `channel` and send `SUB` when connected. A channel that was
    /// left and subscribes again is put back in the host's channel table.
    fn subscribe(
        &self,
        channel: &Channel,
        authorization: Option<&Authorization>,
    ) -> Result<(), ConnectorError>;

    /// Drop `channel`'s registration, sending `UNSUB` when connected.
    fn unsubscribe(&self, channel: &str);

    /// Publish `payload` on `subject`.
    fn publish(&self, subject: &str, payload: Bytes) -> Result<(), ConnectorError>;
}

/// Something that can be subscribed and unsubscribed.
#[async_trait]
pub trait Subscribable: Send + Sync {
    /// Full channel name.
    fn name(&self) -> &str;

    /// Whether the channel is subscribed.
    fn is_subscribed(&self) -> bool;

    /// Subscribe, authorising first when the channel kind requires it.
    ///
    /// # Errors
    ///
    /// Returns the authorisation failure, or [`ConnectorError::Closed`] when
    /// the connector has been dropped.
    async fn subscribe(&self) -> Result<(), ConnectorError>;

    /// Cancel the subscription.
    fn unsubscribe(&self);
}

/// Client-to-client events on authorised channels.
pub trait Whisperable {
    /// Publish `client-<event>` with `data` to other members of the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::NotConnected`] when no connection is up.
    fn whisper(&self, event: &str, data: &Value) -> Result<(), ConnectorError>;

    /// Listen for whispers named `event`.
    fn listen_for_whisper<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static;
}

/// Membership callbacks for presence channels.
pub trait PresenceAware {
    /// Receive the member list. Invoked immediately when the list is already
    /// known, then again on every new snapshot.
    fn here<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static;

    /// Receive each joining member.
    fn joining<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static;

    /// Receive each leaving member. The callback gets the member as stored
    /// from earlier snapshots and joins, falling back to the event payload
    /// for members that were never seen.
    fn leaving<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static;

    /// Current members, once the first snapshot arrived.
    fn members(&self) -> Option<Members>;
}

/// Handle to a named channel. Clones share state.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    kind: ChannelKind,
    formatter: EventFormatter,
    host: Weak<dyn ChannelHost>,
    state: Mutex<State>,
}

struct State {
    listeners: ListenerTable,
    status: SubscriptionStatus,
    attempt: u64,
    authorization: Option<Authorization>,
    members: Members,
    members_known: bool,
}

impl Channel {
    pub(crate) fn new(
        name: impl Into<String>,
        formatter: EventFormatter,
        host: Weak<dyn ChannelHost>,
    ) -> Self {
        let name = name.into();
        Self {
            shared: Arc::new(Shared {
                kind: ChannelKind::of(&name),
                name,
                formatter,
                host,
                state: Mutex::new(State {
                    listeners: ListenerTable::new(),
                    status: SubscriptionStatus::Unsubscribed,
                    attempt: 0,
                    authorization: None,
                    members: Members::default(),
                    members_known: false,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn host(&self) -> Result<Arc<dyn ChannelHost>, ConnectorError> {
        self.shared.host.upgrade().ok_or(ConnectorError::Closed)
    }

    /// Full channel name, including any prefix.
    #[must_use]
    pub fn name(&self) -> &str { &self.shared.name }

    /// Channel kind.
    #[must_use]
    pub fn kind(&self) -> ChannelKind { self.shared.kind }

    /// Current subscription status.
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus { self.lock().status }

    /// Whether the channel is subscribed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool { self.status() == SubscriptionStatus::Subscribed }

    /// Whether any listener is registered.
    #[must_use]
    pub fn has_listeners(&self) -> bool { !self.lock().listeners.is_empty() }

    /// Event names with listeners, as stored after namespacing.
    #[must_use]
    pub fn listened_events(&self) -> Vec<String> {
        self.lock().listeners.events().map(str::to_owned).collect()
    }

    /// Authorisation obtained for the current subscription.
    #[must_use]
    pub fn authorization(&self) -> Option<Authorization> { self.lock().authorization.clone() }

    /// Whether two handles refer to the same channel.
    #[must_use]
    pub fn same_channel(&self, other: &Channel) -> bool { Arc::ptr_eq(&self.shared, &other.shared) }

    /// Name under which a listener for `event` is stored.
    #[must_use]
    pub fn event_key(&self, event: &str) -> String {
        if event == WILDCARD
            || presence::is_presence_event(event)
            || event == SUBSCRIPTION_SUCCEEDED
            || event == SUBSCRIPTION_ERROR
        {
            return event.to_owned();
        }
        match event.strip_prefix(['.', '\\']) {
            Some(absolute) => absolute.to_owned(),
            None => self.shared.formatter.format(event),
        }
    }

    /// Listen for `event`, subscribing if this is the first listener.
    pub fn listen<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listen_to(event, data_listener(callback))
    }

    /// Listen for `event` with a shared [`Listener`] that can later be passed
    /// to [`Channel::stop_listening`].
    pub fn listen_to(&self, event: &str, listener: Listener) -> &Self {
        self.register_listener(self.event_key(event), listener);
        self
    }

    /// Listen for every event on the channel.
    pub fn listen_to_all<F>(&self, callback: F) -> &Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.register_listener(WILDCARD.to_owned(), listener(callback));
        self
    }

    /// Listen for successful subscription.
    pub fn subscribed<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register_listener(SUBSCRIPTION_SUCCEEDED.to_owned(), data_listener(callback));
        self
    }

    /// Listen for authorisation failures.
    pub fn error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register_listener(SUBSCRIPTION_ERROR.to_owned(), data_listener(callback));
        self
    }

    /// Store `listener` under `key`. Returns the member snapshot when one is
    /// known, so presence callbacks can be primed without a second lock.
    pub(crate) fn register_listener(&self, key: String, listener: Listener) -> Option<Value> {
        let (first, snapshot) = {
            let mut state = self.lock();
            let first = state.listeners.add(key, listener);
            (first, state.members_known.then(|| state.members.snapshot()))
        };
        if first {
            self.ensure_subscribed();
        }
        snapshot
    }

    /// Remove listeners.
    ///
    /// - neither argument: clear every listener and unsubscribe;
    /// - `event` only: clear that event, unsubscribing when none remain;
    /// - both: remove `callback` from `event`;
    /// - `callback` only: remove `callback` from every event.
    pub fn stop_listening(&self, event: Option<&str>, callback: Option<&Listener>) -> &Self {
        let key = event.map(|event| self.event_key(event));
        let unsubscribe = {
            let mut state = self.lock();
            match (key.as_deref(), callback) {
                (None, None) => {
                    state.listeners.clear();
                    true
                }
                (Some(key), None) => {
                    state.listeners.remove_event(key);
                    state.listeners.is_empty()
                }
                (Some(key), Some(callback)) => {
                    state.listeners.remove_callback(key, callback);
                    false
                }
                (None, Some(callback)) => {
                    state.listeners.remove_everywhere(callback);
                    false
                }
            }
        };
        if unsubscribe {
            self.unsubscribe();
        }
        self
    }

    /// Invoke listeners for `event`, then wildcard listeners.
    ///
    /// On presence channels the reserved membership events update the member
    /// set first, and their listeners receive the result of that update.
    pub fn trigger(&self, event: &str, data: &Value) {
        let (listeners, payload, wildcard) = {
            let mut state = self.lock();
            let payload = (self.kind() == ChannelKind::Presence
                && presence::is_presence_event(event))
            .then(|| {
                if event == presence::HERE {
                    state.members_known = true;
                }
                state.members.apply(event, data)
            });
            (
                state.listeners.matching(event),
                payload,
                state.listeners.wildcard(),
            )
        };
        invoke(self.name(), &listeners, event, payload.as_ref().unwrap_or(data));
        invoke(self.name(), &wildcard, event, data);
    }

    /// Current members once a snapshot has been received.
    pub(crate) fn members(&self) -> Option<Members> {
        let state = self.lock();
        state.members_known.then(|| state.members.clone())
    }

    /// Publish `body` on this channel's subject.
    pub(crate) fn publish(&self, body: Value) -> Result<(), ConnectorError> {
        self.host()?
            .publish(self.name(), Bytes::from(body.to_string()))
    }

    fn ensure_subscribed(&self) {
        if !self.kind().requires_authorization() {
            if let Err(err) = self.subscribe_now() {
                tracing::warn!(channel = self.name(), error = %err, "subscription failed");
            }
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let channel = self.clone();
                handle.spawn(async move {
                    if let Err(err) = channel.subscribe().await {
                        tracing::warn!(channel = channel.name(), error = %err, "subscription failed");
                    }
                });
            }
            Err(_) => tracing::warn!(
                channel = self.name(),
                "no async runtime to authorise on; call subscribe() explicitly"
            ),
        }
    }

    fn subscribe_now(&self) -> Result<(), ConnectorError> {
        let host = self.host()?;
        match self.begin_subscription() {
            Some(attempt) => self.finish_subscription(host.as_ref(), attempt, None),
            None => Ok(()),
        }
    }

    /// Subscribe, authorising first for private kinds.
    ///
    /// Returns immediately when a subscription is already in progress or
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns the authorisation failure, or [`ConnectorError::Closed`] when
    /// the connector has been dropped. The channel is left unsubscribed.
    pub async fn subscribe(&self) -> Result<(), ConnectorError> {
        let host = self.host()?;
        let Some(attempt) = self.begin_subscription() else {
            return Ok(());
        };
        let authorization = if self.kind().requires_authorization() {
            match host.authorize(self.name()).await {
                Ok(authorization) => Some(authorization),
                Err(err) => {
                    self.abort_subscription(attempt);
                    self.trigger(SUBSCRIPTION_ERROR, &json!({ "message": err.to_string() }));
                    return Err(err);
                }
            }
        } else {
            None
        };
        self.finish_subscription(host.as_ref(), attempt, authorization)
    }

    fn begin_subscription(&self) -> Option<u64> {
        let mut state = self.lock();
        if state.status != SubscriptionStatus::Unsubscribed {
            return None;
        }
        state.status = SubscriptionStatus::Subscribing;
        state.attempt += 1;
        Some(state.attempt)
    }

    fn abort_subscription(&self, attempt: u64) {
        let mut state = self.lock();
        if state.attempt == attempt {
            state.status = SubscriptionStatus::Unsubscribed;
        }
    }

    fn finish_subscription(
        &self,
        host: &dyn ChannelHost,
        attempt: u64,
        authorization: Option<Authorization>,
    ) -> Result<(), ConnectorError> {
        {
            let mut state = self.lock();
            if state.attempt != attempt || state.status != SubscriptionStatus::Subscribing {
                tracing::debug!(channel = self.name(), "subscription superseded");
                return Ok(());
            }
            if let Err(err) = host.subscribe(self, authorization.as_ref()) {
                state.status = SubscriptionStatus::Unsubscribed;
                return Err(err);
            }
            state.status = SubscriptionStatus::Subscribed;
            state.authorization = authorization;
        }
        self.trigger(SUBSCRIPTION_SUCCEEDED, &Value::Null);
        Ok(())
    }

    /// Cancel the subscription. Listeners are kept.
    pub fn unsubscribe(&self) {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut state.status, SubscriptionStatus::Unsubscribed);
        state.attempt += 1;
        state.authorization = None;
        state.members = Members::default();
        state.members_known = false;
        if previous == SubscriptionStatus::Subscribed {
            if let Some(host) = self.shared.host.upgrade() {
                host.unsubscribe(self.name());
            }
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .field("status", &state.status)
            .field("listeners", &state.listeners)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscribable for Channel {
    fn name(&self) -> &str { Channel::name(self) }

    fn is_subscribed(&self) -> bool { Channel::is_subscribed(self) }

    async fn subscribe(&self) -> Result<(), ConnectorError> { Channel::subscribe(self).await }

    fn unsubscribe(&self) { Channel::unsubscribe(self); }
}
