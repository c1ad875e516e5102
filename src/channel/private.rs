//! Private and encrypted-private channels.

use std::ops::Deref;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Channel, Subscribable, Whisperable};
use crate::ConnectorError;

/// Event Laravel broadcasts for database notifications.
pub const NOTIFICATION_EVENT: &str = "Illuminate\\Notifications\\Events\\BroadcastNotificationCreated";

/// Prefix marking client-originated events.
const WHISPER_PREFIX: &str = "client-";

/// Event name used on the wire for whisper `event`.
pub(crate) fn whisper_event(event: &str) -> String { format!(".{WHISPER_PREFIX}{event}") }

/// Body published for a whisper.
pub(crate) fn whisper_payload(event: &str, data: &Value) -> Value {
    json!({ "event": format!("{WHISPER_PREFIX}{event}"), "data": data })
}

/// Channel that must be authorised before it subscribes.
///
/// Used for both `private-` and `private-encrypted-` channels; payload
/// decryption is left to the application. Dereferences to [`Channel`].
#[derive(Clone, Debug)]
pub struct PrivateChannel(Channel);

impl PrivateChannel {
    pub(crate) fn new(channel: Channel) -> Self { Self(channel) }

    /// Underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel { &self.0 }

    /// Listen for broadcast notifications addressed to this channel.
    pub fn notification<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.0.listen(&format!(".{NOTIFICATION_EVENT}"), callback);
        self
    }
}

impl Deref for PrivateChannel {
    type Target = Channel;

    fn deref(&self) -> &Self::Target { &self.0 }
}

#[async_trait]
impl Subscribable for PrivateChannel {
    fn name(&self) -> &str { self.0.name() }

    fn is_subscribed(&self) -> bool { self.0.is_subscribed() }

    async fn subscribe(&self) -> Result<(), ConnectorError> { self.0.subscribe().await }

    fn unsubscribe(&self) { self.0.unsubscribe(); }
}

impl Whisperable for PrivateChannel {
    fn whisper(&self, event: &str, data: &Value) -> Result<(), ConnectorError> {
        self.0.publish(whisper_payload(event, data))
    }

    fn listen_for_whisper<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.0.listen(&whisper_event(event), callback);
        self
    }
}
