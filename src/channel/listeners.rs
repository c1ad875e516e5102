//! Listener storage shared by channels and the connector.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde_json::Value;

use crate::panic::catch_listener;

/// Event name that matches every event.
pub const WILDCARD: &str = "*";

/// Callback invoked with the event name and its data.
///
/// Listeners are compared by identity, so keep a clone of the [`Listener`]
/// you register if you intend to remove it later.
pub type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
///
/// ```
/// use echo_nats::channel::listener;
/// use serde_json::json;
///
/// let log = listener(|event, data| println!("{event}: {data}"));
/// log("Created", &json!({"id": 1}));
/// ```
pub fn listener<F>(callback: F) -> Listener
where
    F: Fn(&str, &Value) + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Wrap a data-only closure as a [`Listener`].
pub(crate) fn data_listener<F>(callback: F) -> Listener
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(move |_: &str, data: &Value| callback(data))
}

/// Ordered event name to callback table.
///
/// Events keep their first-registration order and callbacks keep their
/// registration order within an event. The wildcard [`WILDCARD`] is stored
/// like any other event name.
#[derive(Clone, Default)]
pub struct ListenerTable {
    events: IndexMap<String, Vec<Listener>>,
}

impl ListenerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `listener` under `event`.
    ///
    /// Returns `true` when the table held no listeners before the call.
    pub fn add(&mut self, event: impl Into<String>, listener: Listener) -> bool {
        let was_empty = self.events.is_empty();
        self.events.entry(event.into()).or_default().push(listener);
        was_empty
    }

    /// Remove every callback for `event`. Returns whether anything was removed.
    pub fn remove_event(&mut self, event: &str) -> bool { self.events.shift_remove(event).is_some() }

    /// Remove `listener` from `event`, dropping the event when it empties.
    pub fn remove_callback(&mut self, event: &str, listener: &Listener) -> bool {
        let Some(callbacks) = self.events.get_mut(event) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|existing| !Arc::ptr_eq(existing, listener));
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            self.events.shift_remove(event);
        }
        removed
    }

    /// Remove `listener` from every event.
    pub fn remove_everywhere(&mut self, listener: &Listener) -> bool {
        let events: Vec<String> = self.events.keys().cloned().collect();
        events
            .iter()
            .fold(false, |removed, event| self.remove_callback(event, listener) | removed)
    }

    /// Remove every listener.
    pub fn clear(&mut self) { self.events.clear(); }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.events.is_empty() }

    /// Whether `event` has at least one callback.
    #[must_use]
    pub fn has(&self, event: &str) -> bool { self.events.contains_key(event) }

    /// Registered event names in registration order.
    pub fn events(&self) -> impl Iterator<Item = &str> { self.events.keys().map(String::as_str) }

    /// Callbacks registered for exactly `event`.
    #[must_use]
    pub fn matching(&self, event: &str) -> Vec<Listener> {
        self.events.get(event).cloned().unwrap_or_default()
    }

    /// Callbacks registered for the wildcard.
    #[must_use]
    pub fn wildcard(&self) -> Vec<Listener> { self.matching(WILDCARD) }
}

impl fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.events.iter().map(|(event, list)| (event, list.len())))
            .finish()
    }
}

/// Invoke `listeners` in order, isolating panics.
pub(crate) fn invoke(scope: &str, listeners: &[Listener], event: &str, data: &Value) {
    for listener in listeners {
        catch_listener(scope, event, || listener(event, data));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn recorder() -> (Listener, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = listener(move |event, data| {
            sink.lock().expect("recorder lock").push(format!("{event}={data}"));
        });
        (listener, seen)
    }

    #[test]
    fn add_reports_first_listener_only() {
        let mut table = ListenerTable::new();
        let (a, _) = recorder();
        assert!(table.add("E", Arc::clone(&a)));
        assert!(!table.add(WILDCARD, a));
    }

    #[test]
    fn removes_single_callback_by_identity() {
        let mut table = ListenerTable::new();
        let (a, _) = recorder();
        let (b, _) = recorder();
        table.add("E", Arc::clone(&a));
        table.add("E", Arc::clone(&b));

        assert!(table.remove_callback("E", &a));
        assert_eq!(table.matching("E").len(), 1);
        assert!(table.remove_callback("E", &b));
        assert!(!table.has("E"), "empty events are dropped");
        assert!(table.is_empty());
    }

    #[test]
    fn removes_callback_from_every_event() {
        let mut table = ListenerTable::new();
        let (a, _) = recorder();
        let (b, _) = recorder();
        table.add("E", Arc::clone(&a));
        table.add("F", Arc::clone(&a));
        table.add("F", b);

        assert!(table.remove_everywhere(&a));
        assert_eq!(table.events().collect::<Vec<_>>(), vec!["F"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_siblings() {
        let (after, seen) = recorder();
        let boom = listener(|_, _| panic!("listener failure"));
        invoke("orders", &[boom, after], "E", &json!(1));
        assert_eq!(*seen.lock().expect("recorder lock"), vec!["E=1".to_owned()]);
    }
}
