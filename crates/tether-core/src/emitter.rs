//! Listener-list event emitter.
//!
//! Listeners are registered per event name and called synchronously, in
//! registration order, by [`EventEmitter::emit`]. No lock is held while a
//! listener runs, so listeners may register or remove listeners themselves.

use crate::event::{Emission, EventError, ERROR_EVENT};
use crate::once::OnceCache;
use crate::traits::Emitter;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// A listener callback.
pub type Handler = Arc<dyn Fn(&Emission) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

struct EmitterInner {
    listeners: DashMap<String, Vec<Listener>>,
    next_id: AtomicU64,
    once_cache: OnceCache<Value, EventError>,
}

/// A cheaply cloneable handle to a set of named listeners.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    /// Create an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
                once_cache: OnceCache::new(),
            }),
        }
    }

    /// Register a listener for `event`.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Emission) + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(handler), false)
    }

    /// Register a listener that is removed before its first call.
    pub fn once<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Emission) + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(handler), true)
    }

    fn add_listener(&self, event: &str, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, once, handler });
        trace!(event, once, "Listener added");
        id
    }

    /// Remove one listener.
    ///
    /// Returns `true` if it was registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let removed = match self.inner.listeners.get_mut(event) {
            Some(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|l| l.id != id);
                listeners.len() != before
            }
            None => false,
        };
        self.inner.listeners.remove_if(event, |_, l| l.is_empty());
        removed
    }

    /// Remove every listener for `event`.
    ///
    /// Returns the number of listeners removed.
    pub fn remove_all_listeners(&self, event: &str) -> usize {
        self.inner
            .listeners
            .remove(event)
            .map(|(_, listeners)| listeners.len())
            .unwrap_or(0)
    }

    /// Remove every listener for every event.
    pub fn clear(&self) {
        self.inner.listeners.clear();
    }

    /// Call every listener for `event` with `emission`.
    ///
    /// Returns the number of listeners called. An `error` emission nobody
    /// listens to is logged.
    pub fn emit(&self, event: &str, emission: impl Into<Emission>) -> usize {
        let emission = emission.into();

        let handlers: Vec<Handler> = match self.inner.listeners.get_mut(event) {
            Some(mut listeners) => {
                let handlers = listeners.iter().map(|l| l.handler.clone()).collect();
                listeners.retain(|l| !l.once);
                handlers
            }
            None => Vec::new(),
        };
        self.inner.listeners.remove_if(event, |_, l| l.is_empty());

        if handlers.is_empty() {
            if event == ERROR_EVENT {
                warn!(emission = ?emission, "Unhandled error event");
            } else {
                trace!(event, "No listeners");
            }
            return 0;
        }

        trace!(event, listeners = handlers.len(), "Emitting");
        for handler in &handlers {
            handler(&emission);
        }
        handlers.len()
    }

    /// Get the number of listeners for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .listeners
            .get(event)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Get every event name with at least one listener.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.inner
            .listeners
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }

    /// Create a handle that does not keep the emitter alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakEventEmitter {
        WeakEventEmitter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The once-future cache owned by this emitter.
    #[must_use]
    pub fn once_cache(&self) -> &OnceCache<Value, EventError> {
        &self.inner.once_cache
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<EventEmitter> for EventEmitter {
    fn as_ref(&self) -> &EventEmitter {
        self
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("events", &self.event_names())
            .field("once_cache", &self.inner.once_cache)
            .finish()
    }
}

impl Emitter for EventEmitter {
    type Item = Emission;
    type Handle = ListenerId;

    fn emit(&self, event: &str, item: Emission) -> usize {
        EventEmitter::emit(self, event, item)
    }

    fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Emission) + Send + Sync + 'static,
    {
        EventEmitter::on(self, event, handler)
    }

    fn once<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Emission) + Send + Sync + 'static,
    {
        EventEmitter::once(self, event, handler)
    }

    fn dispose(&self, event: &str) -> bool {
        self.remove_all_listeners(event) > 0
    }

    fn dispose_all(&self) {
        self.clear();
    }
}

/// A weak handle to an [`EventEmitter`].
#[derive(Clone)]
pub struct WeakEventEmitter {
    inner: Weak<EmitterInner>,
}

impl WeakEventEmitter {
    /// Get a strong handle if the emitter is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<EventEmitter> {
        self.inner.upgrade().map(|inner| EventEmitter { inner })
    }
}

impl fmt::Debug for WeakEventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEventEmitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(emitter: &EventEmitter, event: &str) -> Arc<Mutex<Vec<Emission>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        emitter.on(event, move |e| sink.lock().unwrap().push(e.clone()));
        seen
    }

    #[test]
    fn test_emit_reaches_only_matching_listeners() {
        let emitter = EventEmitter::new();
        let hello = recorder(&emitter, "hello");
        let other = recorder(&emitter, "other");

        let called = emitter.emit("hello", vec![json!("arg1"), json!("arg2")]);

        assert_eq!(called, 1);
        assert_eq!(
            *hello.lock().unwrap(),
            vec![Emission::Args(vec![json!("arg1"), json!("arg2")])]
        );
        assert!(other.lock().unwrap().is_empty());
    }

    #[test]
    fn test_once_listener_fires_once() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        emitter.once("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(emitter.emit("tick", Vec::new()), 1);
        assert_eq!(emitter.emit("tick", Vec::new()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(emitter.event_names().is_empty());
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter = EventEmitter::new();
        let id = emitter.on("x", |_| {});
        let _keep = emitter.on("x", |_| {});
        assert_eq!(emitter.listener_count("x"), 2);

        assert!(emitter.off("x", id));
        assert!(!emitter.off("x", id));
        assert_eq!(emitter.listener_count("x"), 1);
    }

    #[test]
    fn test_listener_can_register_listeners() {
        let emitter = EventEmitter::new();
        let inner = emitter.clone();
        emitter.on("outer", move |_| {
            inner.on("late", |_| {});
        });

        emitter.emit("outer", Vec::new());
        assert_eq!(emitter.listener_count("late"), 1);
    }

    #[test]
    fn test_unhandled_error_does_not_panic() {
        let emitter = EventEmitter::new();
        assert_eq!(
            emitter.emit(ERROR_EVENT, EventError::Value(json!("ignored"))),
            0
        );
    }

    #[test]
    fn test_weak_handle() {
        let emitter = EventEmitter::new();
        let weak = emitter.downgrade();
        assert!(weak.upgrade().is_some());
        drop(emitter);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_dispose_through_trait() {
        let emitter = EventEmitter::new();
        Emitter::on(&emitter, "a", |_| {});
        Emitter::on(&emitter, "b", |_| {});

        assert!(Emitter::dispose(&emitter, "a"));
        assert!(!Emitter::dispose(&emitter, "a"));
        Emitter::dispose_all(&emitter);
        assert!(emitter.event_names().is_empty());
    }
}
