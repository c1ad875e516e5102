//! Channel to subscription-id bookkeeping.
//!
//! The registry maps channel names to client-generated subscription ids and
//! records whether each channel currently wants to be subscribed. Entries
//! keep their creation order so that replay after a reconnect re-issues
//! `SUB` commands in the order channels were first subscribed.
//!
//! The registry never performs I/O. Operations that must reach the server
//! return the [`ClientOp`] to send and leave delivery to the caller, which
//! knows whether a connection is up.

use indexmap::IndexMap;

use crate::protocol::ClientOp;

/// State kept for one registered channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    sid: String,
    subscribed: bool,
    authorization: Option<String>,
}

impl Subscription {
    /// Subscription id used on the wire.
    #[must_use]
    pub fn sid(&self) -> &str { &self.sid }

    /// Whether the channel wants to be subscribed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool { self.subscribed }

    /// Authorisation token obtained for the channel, if any.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> { self.authorization.as_deref() }
}

/// Ordered registry of channel subscriptions.
///
/// # Examples
///
/// ```
/// use echo_nats::{protocol::ClientOp, registry::SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// let sid = registry.register("orders");
/// assert_eq!(registry.register("orders"), sid);
///
/// registry.mark_subscribed("orders");
/// assert_eq!(
///     registry.replay_active(),
///     vec![ClientOp::Sub {
///         subject: "orders".into(),
///         queue_group: None,
///         sid,
///     }]
/// );
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: IndexMap<String, Subscription>,
    next_sid: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `channel` and return its subscription id.
    ///
    /// Registering an existing channel returns the id it already has. Ids are
    /// never reused, even after the channel is removed.
    pub fn register(&mut self, channel: &str) -> String {
        if let Some(entry) = self.entries.get(channel) {
            return entry.sid.clone();
        }
        self.next_sid += 1;
        let sid = format!("sid_{}", self.next_sid);
        self.entries.insert(
            channel.to_owned(),
            Subscription {
                sid: sid.clone(),
                subscribed: false,
                authorization: None,
            },
        );
        sid
    }

    /// Mark `channel` as wanting a subscription. Returns `false` when the
    /// channel is not registered.
    pub fn mark_subscribed(&mut self, channel: &str) -> bool { self.set_desired(channel, true) }

    /// Mark `channel` as not wanting a subscription. Returns `false` when the
    /// channel is not registered.
    pub fn mark_unsubscribed(&mut self, channel: &str) -> bool { self.set_desired(channel, false) }

    fn set_desired(&mut self, channel: &str, subscribed: bool) -> bool {
        let Some(entry) = self.entries.get_mut(channel) else {
            return false;
        };
        entry.subscribed = subscribed;
        true
    }

    /// Store the authorisation token obtained for `channel`.
    pub fn set_authorization(&mut self, channel: &str, token: Option<String>) {
        if let Some(entry) = self.entries.get_mut(channel) {
            entry.authorization = token;
        }
    }

    /// `SUB` command for `channel` when it is registered.
    #[must_use]
    pub fn subscribe_op(&self, channel: &str) -> Option<ClientOp> {
        self.entries.get(channel).map(|entry| ClientOp::Sub {
            subject: channel.to_owned(),
            queue_group: None,
            sid: entry.sid.clone(),
        })
    }

    /// `SUB` commands for every channel that wants a subscription, in
    /// creation order.
    #[must_use]
    pub fn replay_active(&self) -> Vec<ClientOp> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.subscribed)
            .map(|(channel, entry)| ClientOp::Sub {
                subject: channel.clone(),
                queue_group: None,
                sid: entry.sid.clone(),
            })
            .collect()
    }

    /// Delete `channel` from the registry.
    ///
    /// Returns the `UNSUB` to send when `connected` is true; otherwise the
    /// removal is purely local.
    pub fn remove(&mut self, channel: &str, connected: bool) -> Option<ClientOp> {
        let entry = self.entries.shift_remove(channel)?;
        connected.then(|| ClientOp::Unsub {
            sid: entry.sid,
            max_msgs: None,
        })
    }

    /// Look up the entry for `channel`.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<&Subscription> { self.entries.get(channel) }

    /// Channel name owning subscription id `sid`.
    #[must_use]
    pub fn channel_for_sid(&self, sid: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.sid == sid)
            .map(|(channel, _)| channel.as_str())
    }

    /// Whether `channel` is registered and wants a subscription.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.entries.get(channel).is_some_and(|entry| entry.subscribed)
    }

    /// Registered channel names in creation order.
    pub fn channels(&self) -> impl Iterator<Item = &str> { self.entries.keys().map(String::as_str) }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn registry() -> SubscriptionRegistry { SubscriptionRegistry::new() }

    fn sub_sids(ops: &[ClientOp]) -> Vec<(&str, &str)> {
        ops.iter()
            .map(|op| match op {
                ClientOp::Sub { subject, sid, .. } => (subject.as_str(), sid.as_str()),
                other => panic!("expected SUB, got {other:?}"),
            })
            .collect()
    }

    #[rstest]
    fn ids_are_sequential_and_never_reused(mut registry: SubscriptionRegistry) {
        assert_eq!(registry.register("a"), "sid_1");
        assert_eq!(registry.register("b"), "sid_2");
        assert_eq!(registry.register("a"), "sid_1");
        registry.remove("a", false);
        assert_eq!(registry.register("a"), "sid_3");
    }

    #[rstest]
    fn replay_sends_only_subscribed_channels_in_creation_order(
        mut registry: SubscriptionRegistry,
    ) {
        for channel in ["first", "second", "third", "fourth"] {
            registry.register(channel);
        }
        registry.mark_subscribed("third");
        registry.mark_subscribed("first");
        registry.mark_subscribed("fourth");
        registry.mark_unsubscribed("fourth");

        let ops = registry.replay_active();
        assert_eq!(sub_sids(&ops), vec![("first", "sid_1"), ("third", "sid_3")]);
    }

    #[rstest]
    fn removed_channels_are_not_replayed(mut registry: SubscriptionRegistry) {
        registry.register("kept");
        registry.register("left");
        registry.mark_subscribed("kept");
        registry.mark_subscribed("left");
        registry.remove("left", true);

        assert_eq!(sub_sids(&registry.replay_active()), vec![("kept", "sid_1")]);
    }

    #[rstest]
    #[case::connected(true, Some(ClientOp::Unsub { sid: "sid_1".into(), max_msgs: None }))]
    #[case::offline(false, None)]
    fn remove_only_unsubscribes_when_connected(
        mut registry: SubscriptionRegistry,
        #[case] connected: bool,
        #[case] expected: Option<ClientOp>,
    ) {
        registry.register("orders");
        assert_eq!(registry.remove("orders", connected), expected);
        assert!(registry.get("orders").is_none());
        assert_eq!(registry.remove("orders", connected), None);
    }

    #[rstest]
    fn sid_lookup_and_authorization(mut registry: SubscriptionRegistry) {
        let sid = registry.register("private-orders");
        registry.set_authorization("private-orders", Some("key:sig".into()));
        assert_eq!(registry.channel_for_sid(&sid), Some("private-orders"));
        assert_eq!(registry.channel_for_sid("sid_99"), None);
        assert_eq!(
            registry.get("private-orders").and_then(Subscription::authorization),
            Some("key:sig")
        );
        assert!(!registry.mark_subscribed("unknown"));
    }
}
