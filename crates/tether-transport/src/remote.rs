//! Remote event emitter.
//!
//! Bridges a [`Connection`] and an [`EventEmitter`]: envelopes arriving on the
//! connection are re-raised locally, and [`RemoteEventEmitter::remote_emit`]
//! raises events on the emitter at the other end of the stream.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tether_core::{
    marshal, Emission, EventEmitter, EventError, ErrorRegistry, RemoteError, ERROR_EVENT,
    MESSAGE_EVENT,
};
use tether_protocol::Envelope;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionConfig, END_EVENT};
use crate::traits::{ByteStream, ConnectionId, TransportError};

/// An event emitter mirrored across a byte stream.
///
/// Local listeners are registered through [`events`](Self::events) (or any
/// function taking `AsRef<EventEmitter>`, such as [`tether_core::once`]).
#[derive(Clone)]
pub struct RemoteEventEmitter {
    connection: Connection,
}

impl RemoteEventEmitter {
    /// Wrap `stream` and start reading.
    pub fn new<S: ByteStream>(stream: S) -> Self {
        Self::with_emitter(stream, EventEmitter::new())
    }

    /// Wrap `stream`, raising remote events on `events`.
    ///
    /// Listeners registered on `events` beforehand are guaranteed to see the
    /// first event.
    pub fn with_emitter<S: ByteStream>(stream: S, events: EventEmitter) -> Self {
        Self::with_config(
            stream,
            events,
            ConnectionConfig::default(),
            ErrorRegistry::global(),
        )
    }

    /// Wrap `stream` with a custom connection configuration and error registry.
    pub fn with_config<S: ByteStream>(
        stream: S,
        events: EventEmitter,
        config: ConnectionConfig,
        registry: Arc<ErrorRegistry>,
    ) -> Self {
        attach_demux(&events, registry);
        Self {
            connection: Connection::with_config(stream, events, config),
        }
    }

    /// Raise `event` on the remote emitter.
    ///
    /// Positional arguments are sent as they are, including on `error`. An
    /// error emission on `error` is marshaled so the remote side rebuilds it
    /// with its name, message, trace text and custom fields; a plain value
    /// error arrives as that value. Returns `false` if the connection is dead.
    pub fn remote_emit(&self, event: &str, emission: impl Into<Emission>) -> bool {
        let envelope = match emission.into() {
            Emission::Args(args) => {
                trace!(connection = %self.id(), event, args = args.len(), "Remote emit");
                Envelope::event(event, args)
            }
            Emission::Error(EventError::Value(value)) => Envelope::event(event, vec![value]),
            Emission::Error(error) => {
                let error = match error {
                    EventError::Remote(error) => error,
                    other => RemoteError::capture(&other),
                };
                trace!(connection = %self.id(), event, name = %error.name(), "Remote emit error");
                let wire = marshal(&error);
                if event == ERROR_EVENT {
                    Envelope::error(wire)
                } else {
                    match serde_json::to_value(&wire) {
                        Ok(value) => Envelope::event(event, vec![value]),
                        Err(e) => {
                            debug!(connection = %self.id(), error = %e, "Error not encodable");
                            return false;
                        }
                    }
                }
            }
        };
        self.connection.send(&envelope)
    }

    /// Raise `error` on the remote emitter's reserved `error` event.
    pub fn remote_emit_error(&self, error: &RemoteError) -> bool {
        self.remote_emit(ERROR_EVENT, error.clone())
    }

    /// Send an arbitrary value as one frame.
    pub fn send<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        self.connection.send(value)
    }

    /// Like [`send`](Self::send), but reports why a frame was not queued.
    ///
    /// # Errors
    ///
    /// See [`Connection::try_send`].
    pub fn try_send<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), TransportError> {
        self.connection.try_send(value)
    }

    /// End the write side. Returns `false` if already dead.
    pub fn close(&self) -> bool {
        self.connection.close()
    }

    /// Check if the connection can no longer write.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.connection.is_dead()
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// The local emitter remote events are raised on.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        self.connection.events()
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl AsRef<EventEmitter> for RemoteEventEmitter {
    fn as_ref(&self) -> &EventEmitter {
        self.events()
    }
}

impl AsRef<Connection> for RemoteEventEmitter {
    fn as_ref(&self) -> &Connection {
        &self.connection
    }
}

impl std::fmt::Debug for RemoteEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEventEmitter")
            .field("connection", &self.connection)
            .finish()
    }
}

/// Turn `message` notifications on `events` into the events they carry.
fn attach_demux(events: &EventEmitter, registry: Arc<ErrorRegistry>) {
    // The emitter owns this listener, so the listener must not own the emitter.
    let weak = events.downgrade();
    events.on(MESSAGE_EVENT, move |emission| {
        let Some(events) = weak.upgrade() else {
            return;
        };
        let Some(value) = emission.first() else {
            return;
        };
        dispatch_envelope(&events, &registry, value);
    });
}

fn dispatch_envelope(events: &EventEmitter, registry: &ErrorRegistry, value: &Value) {
    match Envelope::from_value(value) {
        Some(Envelope::Error(wire)) => {
            debug!(name = %wire.name, "Remote error received");
            events.emit(ERROR_EVENT, EventError::Remote(registry.unmarshal(wire)));
        }
        Some(Envelope::Event { event, .. }) if event == MESSAGE_EVENT || event == END_EVENT => {
            warn!("Ignoring remote event on reserved name {}", event);
        }
        Some(Envelope::Event { event, args }) => {
            trace!(event = %event, args = args.len(), "Remote event received");
            events.emit(&event, args);
        }
        None => {
            trace!("Ignoring frame that is not an event envelope");
        }
    }
}
