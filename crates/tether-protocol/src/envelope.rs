//! Envelope types for the Tether event protocol.
//!
//! Every frame carries one envelope. Two shapes exist:
//!
//! ```text
//! { "type": "event", "event": <name>, "args": [<value>, ...] }
//! { "type": "event", "event": "error", "name": .., "message": .., "stack": .., "custom": {..} }
//! ```
//!
//! Any other `type` is reserved for future extension and is ignored.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// The only envelope type this protocol layer acts on.
pub const EVENT_TYPE: &str = "event";

/// Reserved event name for errors.
pub const ERROR_EVENT: &str = "error";

/// Structural representation of an error on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Error kind name.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Trace text. Carried as-is, never interpreted.
    #[serde(default)]
    pub stack: String,
    /// Every additional field beyond name, message and stack.
    #[serde(default)]
    pub custom: Map<String, Value>,
}

/// A decoded protocol envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A named event with positional arguments.
    Event {
        /// Event name.
        event: String,
        /// Positional arguments.
        args: Vec<Value>,
    },

    /// An error raised on the reserved `error` event.
    Error(WireError),
}

impl Envelope {
    /// Create a new Event envelope.
    #[must_use]
    pub fn event(event: impl Into<String>, args: Vec<Value>) -> Self {
        Envelope::Event {
            event: event.into(),
            args,
        }
    }

    /// Create a new Error envelope.
    #[must_use]
    pub fn error(error: WireError) -> Self {
        Envelope::Error(error)
    }

    /// Get the event name this envelope raises.
    #[must_use]
    pub fn event_name(&self) -> &str {
        match self {
            Envelope::Event { event, .. } => event,
            Envelope::Error(_) => ERROR_EVENT,
        }
    }

    /// Interpret a decoded frame as an envelope.
    ///
    /// Returns `None` when `type` is not `"event"` or required fields are
    /// missing. An `"error"` event is error-shaped only when it has no `args`;
    /// with `args` it is an ordinary event.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("type").and_then(Value::as_str) != Some(EVENT_TYPE) {
            return None;
        }

        let event = obj.get("event")?.as_str()?;

        match obj.get("args") {
            Some(Value::Array(args)) => Some(Envelope::event(event, args.clone())),
            Some(_) => None,
            None if event == ERROR_EVENT => WireError::deserialize(value).ok().map(Envelope::Error),
            None => None,
        }
    }

    /// Render the envelope as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Envelope::Event { event, args } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", EVENT_TYPE)?;
                map.serialize_entry("event", event)?;
                map.serialize_entry("args", args)?;
                map.end()
            }
            Envelope::Error(error) => {
                let mut map = serializer.serialize_map(Some(6))?;
                map.serialize_entry("type", EVENT_TYPE)?;
                map.serialize_entry("event", ERROR_EVENT)?;
                map.serialize_entry("name", &error.name)?;
                map.serialize_entry("message", &error.message)?;
                map.serialize_entry("stack", &error.stack)?;
                map.serialize_entry("custom", &error.custom)?;
                map.end()
            }
        }
    }
}
