//! Routing of data deliveries to listeners.
//!
//! A delivery body is decoded as JSON when possible. Objects carrying an
//! `event` or `data` field are treated as event envelopes; anything else is
//! delivered whole under [`DEFAULT_EVENT`]. The event name is namespaced and
//! dispatched in a fixed order:
//!
//! 1. global `message` listeners, with the raw decoded payload;
//! 2. global listeners for the formatted event name;
//! 3. the channel's listeners for the formatted name, then its wildcard
//!    listeners;
//! 4. when the original name differs, the channel's listeners for it, then
//!    its wildcard listeners again.
//!
//! A delivery that cannot be correlated with a channel stops after step 2.

use serde_json::{Map, Value};

use crate::{
    channel::{Channel, Listener, invoke},
    formatter::EventFormatter,
    protocol::Delivery,
};

/// Scope reported when a global listener panics.
pub(crate) const GLOBAL_SCOPE: &str = "<global>";

/// Global listener set receiving every raw payload.
pub const MESSAGE_EVENT: &str = "message";

/// Event name used when a payload does not name one.
pub const DEFAULT_EVENT: &str = "message";

/// Decoded delivery body.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Event name as sent, before namespacing.
    pub event: String,
    /// Event data handed to listeners.
    pub data: Value,
    /// The whole decoded payload.
    pub raw: Value,
}

/// Decode a delivery body.
///
/// String `data` holding a JSON object or array is decoded as well, since
/// some publishers double-encode their event data.
///
/// ```
/// use echo_nats::router::decode_payload;
/// use serde_json::json;
///
/// let envelope = decode_payload(br#"{"event":"E","data":"{\"id\":1}"}"#);
/// assert_eq!(envelope.event, "E");
/// assert_eq!(envelope.data, json!({"id": 1}));
///
/// let plain = decode_payload(b"hello");
/// assert_eq!(plain.event, "message");
/// assert_eq!(plain.data, json!("hello"));
/// ```
#[must_use]
pub fn decode_payload(payload: &[u8]) -> Envelope {
    let text = String::from_utf8_lossy(payload);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) if map.contains_key("event") || map.contains_key("data") => {
            from_envelope(map)
        }
        Ok(value) => Envelope {
            event: DEFAULT_EVENT.to_owned(),
            data: value.clone(),
            raw: value,
        },
        Err(_) => {
            let value = Value::String(text.into_owned());
            Envelope {
                event: DEFAULT_EVENT.to_owned(),
                data: value.clone(),
                raw: value,
            }
        }
    }
}

fn from_envelope(map: Map<String, Value>) -> Envelope {
    let event = map
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_EVENT)
        .to_owned();
    let data = map.get("data").cloned().map_or(Value::Null, decode_nested);
    Envelope {
        event,
        data,
        raw: Value::Object(map),
    }
}

fn decode_nested(data: Value) -> Value {
    if let Value::String(text) = &data {
        if let Ok(nested @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str(text) {
            return nested;
        }
    }
    data
}

/// Where deliveries are routed to.
pub(crate) trait RouteTarget {
    /// Global listeners registered for `event`.
    fn global_listeners(&self, event: &str) -> Vec<Listener>;

    /// Channel the delivery belongs to, resolved by subscription id and then
    /// by subject.
    fn channel_for(&self, delivery: &Delivery) -> Option<Channel>;
}

/// Outcome of routing one delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Delivered to the named channel.
    Channel(String),
    /// No channel matched; only global listeners saw the delivery.
    Uncorrelated,
}

/// Route `delivery` through `target`.
pub(crate) fn route(
    target: &impl RouteTarget,
    formatter: &EventFormatter,
    delivery: &Delivery,
) -> Routed {
    let envelope = decode_payload(&delivery.payload);
    let formatted = formatter.format(&envelope.event);

    invoke(
        GLOBAL_SCOPE,
        &target.global_listeners(MESSAGE_EVENT),
        MESSAGE_EVENT,
        &envelope.raw,
    );
    invoke(
        GLOBAL_SCOPE,
        &target.global_listeners(&formatted),
        &formatted,
        &envelope.data,
    );

    let Some(channel) = target.channel_for(delivery) else {
        tracing::debug!(
            subject = %delivery.subject,
            sid = %delivery.sid,
            event = %formatted,
            "no channel for delivery"
        );
        return Routed::Uncorrelated;
    };

    channel.trigger(&formatted, &envelope.data);
    if formatted != envelope.event {
        channel.trigger(&envelope.event, &envelope.data);
    }
    Routed::Channel(channel.name().to_owned())
}
