//! Presence membership tracking.
//!
//! Presence channels receive three reserved events. [`HERE`] carries the full
//! member list and replaces the local set wholesale, [`JOINING`] adds one
//! member and [`LEAVING`] removes one. Members are keyed by their `id` field,
//! or `user_id` when `id` is absent. A later write for the same id replaces
//! the earlier one.

use std::ops::Deref;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use super::{
    Channel,
    PresenceAware,
    Subscribable,
    Whisperable,
    listeners::{Listener, data_listener, invoke},
    private::{whisper_event, whisper_payload},
};
use crate::ConnectorError;

/// Snapshot of every member currently present.
pub const HERE: &str = "presence:here";
/// A member joined.
pub const JOINING: &str = "presence:joining";
/// A member left.
pub const LEAVING: &str = "presence:leaving";

/// Whether `event` is one of the reserved presence events.
#[must_use]
pub fn is_presence_event(event: &str) -> bool { matches!(event, HERE | JOINING | LEAVING) }

/// Extract a member id from `member`, accepting `id` or `user_id` as a
/// string or number.
///
/// ```
/// use echo_nats::channel::presence::member_id;
/// use serde_json::json;
///
/// assert_eq!(member_id(&json!({"id": 7})), Some("7".into()));
/// assert_eq!(member_id(&json!({"user_id": "u-1"})), Some("u-1".into()));
/// assert_eq!(member_id(&json!({"name": "anon"})), None);
/// ```
#[must_use]
pub fn member_id(member: &Value) -> Option<String> {
    let id = member.get("id").or_else(|| member.get("user_id"))?;
    match id {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Members of a presence channel in arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Members {
    by_id: IndexMap<String, Value>,
}

impl Members {
    /// Replace the whole set from a snapshot.
    ///
    /// Accepts an array of members or an object whose values are members.
    /// Entries without an id are skipped.
    pub fn replace(&mut self, snapshot: &Value) {
        let entries: Box<dyn Iterator<Item = &Value>> = match snapshot {
            Value::Array(items) => Box::new(items.iter()),
            Value::Object(map) => Box::new(map.values()),
            other => {
                tracing::warn!(snapshot = %other, "ignoring presence snapshot that is not a list");
                Box::new(std::iter::empty())
            }
        };
        self.by_id = entries
            .filter_map(|member| {
                let id = member_id(member);
                if id.is_none() {
                    tracing::debug!(%member, "skipping presence member without id");
                }
                id.map(|id| (id, member.clone()))
            })
            .collect();
    }

    /// Insert or replace one member. Returns its id.
    pub fn insert(&mut self, member: &Value) -> Option<String> {
        let id = member_id(member)?;
        self.by_id.insert(id.clone(), member.clone());
        Some(id)
    }

    /// Remove the member matching `member`'s id.
    pub fn remove(&mut self, member: &Value) -> Option<Value> {
        let id = member_id(member)?;
        self.by_id.shift_remove(&id)
    }

    /// Member with `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Value> { self.by_id.get(id) }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize { self.by_id.len() }

    /// Whether nobody is present.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.by_id.is_empty() }

    /// Members as a JSON array.
    #[must_use]
    pub fn snapshot(&self) -> Value { Value::Array(self.by_id.values().cloned().collect()) }

    /// Apply a reserved presence event and return the data its listeners
    /// receive.
    pub(crate) fn apply(&mut self, event: &str, data: &Value) -> Value {
        match event {
            HERE => {
                self.replace(data);
                self.snapshot()
            }
            JOINING => {
                self.insert(data);
                data.clone()
            }
            LEAVING => self.remove(data).unwrap_or_else(|| data.clone()),
            _ => data.clone(),
        }
    }
}

/// Presence channel handle.
///
/// Dereferences to [`Channel`] for listener management.
#[derive(Clone, Debug)]
pub struct PresenceChannel(Channel);

impl PresenceChannel {
    pub(crate) fn new(channel: Channel) -> Self { Self(channel) }

    /// Underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel { &self.0 }

    fn listen_reserved(&self, event: &'static str, listener: Listener) -> Option<Value> {
        self.0.register_listener(event.to_owned(), listener)
    }
}

impl Deref for PresenceChannel {
    type Target = Channel;

    fn deref(&self) -> &Self::Target { &self.0 }
}

#[async_trait]
impl Subscribable for PresenceChannel {
    fn name(&self) -> &str { self.0.name() }

    fn is_subscribed(&self) -> bool { self.0.is_subscribed() }

    async fn subscribe(&self) -> Result<(), ConnectorError> { self.0.subscribe().await }

    fn unsubscribe(&self) { self.0.unsubscribe(); }
}

impl Whisperable for PresenceChannel {
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

impl PresenceAware for PresenceChannel {
    fn here<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let listener = data_listener(callback);
        if let Some(snapshot) = self.listen_reserved(HERE, listener.clone()) {
            invoke(self.0.name(), &[listener], HERE, &snapshot);
        }
        self
    }

    fn joining<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listen_reserved(JOINING, data_listener(callback));
        self
    }

    fn leaving<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listen_reserved(LEAVING, data_listener(callback));
        self
    }

    fn members(&self) -> Option<Members> { self.0.members() }
}
