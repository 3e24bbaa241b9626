//! Channel-per-event reactive emitter.
//!
//! Unlike [`EventEmitter`](crate::EventEmitter), which keeps ad hoc listener
//! lists, a [`ReactiveEmitter`] keeps one persistent [`Channel`] per event name.
//! Channels are created lazily on first use and live until disposed.

use crate::channel::{Channel, ChannelMode, Subscription};
use crate::traits::Emitter;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Returned by [`ReactiveEmitter::on`] and [`ReactiveEmitter::once`].
///
/// Holds the channel, so values can be published through it directly, and the
/// subscription, so the caller can unsubscribe. Once the channel is disposed
/// both handles go inert.
pub struct Pipeable<T> {
    /// The channel the handler was attached to.
    pub channel: Channel<T>,
    /// The handler's subscription.
    pub subscription: Subscription<T>,
}

impl<T> fmt::Debug for Pipeable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeable")
            .field("channel", &self.channel)
            .field("subscription", &self.subscription)
            .finish()
    }
}

struct ReactiveInner<T> {
    mode: ChannelMode,
    channels: DashMap<String, Channel<T>>,
}

/// An event bus with one channel per event name.
///
/// The emission mode is fixed per instance. Clones share the same channels.
pub struct ReactiveEmitter<T> {
    inner: Arc<ReactiveInner<T>>,
}

impl<T> Clone for ReactiveEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ReactiveEmitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an emitter. `immediate == false` selects replay-last channels.
    #[must_use]
    pub fn new(immediate: bool) -> Self {
        Self::with_mode(if immediate {
            ChannelMode::Immediate
        } else {
            ChannelMode::ReplayLast
        })
    }

    /// Create an emitter with an explicit channel mode.
    #[must_use]
    pub fn with_mode(mode: ChannelMode) -> Self {
        info!(?mode, "Creating reactive emitter");
        Self {
            inner: Arc::new(ReactiveInner {
                mode,
                channels: DashMap::new(),
            }),
        }
    }

    /// Get the channel mode used for every channel.
    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        self.inner.mode
    }

    /// Get the channel for `name`, creating it if needed.
    pub fn channel(&self, name: &str) -> Channel<T> {
        // The shard lock is released before the clone is used.
        self.inner
            .channels
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(channel = %name, "Creating new channel");
                Channel::new(name, self.inner.mode)
            })
            .clone()
    }

    /// Publish `value` on `name`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn emit(&self, name: &str, value: T) -> usize {
        let count = self.channel(name).publish(value);
        trace!(channel = %name, recipients = count, "Emitted");
        count
    }

    /// Subscribe `handler` to every value on `name`.
    pub fn on<F>(&self, name: &str, handler: F) -> Pipeable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let channel = self.channel(name);
        let subscription = channel.subscribe(handler);
        Pipeable {
            channel,
            subscription,
        }
    }

    /// Subscribe `handler` to the next value on `name`.
    pub fn once<F>(&self, name: &str, handler: F) -> Pipeable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let channel = self.channel(name);
        let subscription = channel.subscribe_once(handler);
        Pipeable {
            channel,
            subscription,
        }
    }

    /// Tear down the channel for `name`.
    ///
    /// Returns `true` if the channel existed.
    pub fn dispose(&self, name: &str) -> bool {
        match self.inner.channels.remove(name) {
            Some((_, channel)) => {
                channel.close();
                debug!(channel = %name, "Disposed channel");
                true
            }
            None => false,
        }
    }

    /// Tear down every channel.
    pub fn dispose_all(&self) {
        let names = self.channel_names();
        for name in &names {
            self.dispose(name);
        }
        debug!(channels = names.len(), "Disposed all channels");
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, name: &str) -> bool {
        self.inner.channels.contains_key(name)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.inner.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Get emitter statistics.
    #[must_use]
    pub fn stats(&self) -> ReactiveStats {
        ReactiveStats {
            channel_count: self.inner.channels.len(),
            total_subscriptions: self
                .inner
                .channels
                .iter()
                .map(|c| c.subscriber_count())
                .sum(),
        }
    }
}

impl<T> Default for ReactiveEmitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(true)
    }
}

impl<T> fmt::Debug for ReactiveEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEmitter")
            .field("mode", &self.inner.mode)
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

impl<T> Emitter for ReactiveEmitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;
    type Handle = Pipeable<T>;

    fn emit(&self, event: &str, item: T) -> usize {
        ReactiveEmitter::emit(self, event, item)
    }

    fn on<F>(&self, event: &str, handler: F) -> Pipeable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        ReactiveEmitter::on(self, event, handler)
    }

    fn once<F>(&self, event: &str, handler: F) -> Pipeable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        ReactiveEmitter::once(self, event, handler)
    }

    fn dispose(&self, event: &str) -> bool {
        ReactiveEmitter::dispose(self, event)
    }

    fn dispose_all(&self) {
        ReactiveEmitter::dispose_all(self);
    }
}

/// Reactive emitter statistics.
#[derive(Debug, Clone)]
pub struct ReactiveStats {
    /// Number of live channels.
    pub channel_count: usize,
    /// Total number of subscriptions across channels.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(
        emitter: &ReactiveEmitter<&'static str>,
        name: &str,
    ) -> (Arc<Mutex<Vec<&'static str>>>, Pipeable<&'static str>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = emitter.on(name, move |v| sink.lock().unwrap().push(*v));
        (seen, handle)
    }

    #[test]
    fn test_immediate_mode_skips_earlier_values() {
        let emitter = ReactiveEmitter::new(true);
        assert_eq!(emitter.emit("x", "first"), 0);

        let (seen, _handle) = recorder(&emitter, "x");
        assert_eq!(emitter.emit("x", "second"), 1);

        assert_eq!(*seen.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_replay_mode_delivers_last_value() {
        let emitter = ReactiveEmitter::new(false);
        emitter.emit("x", "first");
        emitter.emit("x", "second");

        let (seen, _handle) = recorder(&emitter, "x");
        emitter.emit("x", "third");

        assert_eq!(*seen.lock().unwrap(), vec!["second", "third"]);
    }

    #[test]
    fn test_replay_mode_has_no_initial_value() {
        let emitter: ReactiveEmitter<&'static str> = ReactiveEmitter::new(false);
        let (seen, _handle) = recorder(&emitter, "x");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_once_unsubscribes_after_first_value() {
        let emitter = ReactiveEmitter::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = emitter.once("x", move |v: &u32| sink.lock().unwrap().push(*v));

        emitter.emit("x", 1);
        emitter.emit("x", 2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(!handle.subscription.is_active());
    }

    #[test]
    fn test_unsubscribe_through_pipeable() {
        let emitter = ReactiveEmitter::new(true);
        let (seen, handle) = recorder(&emitter, "x");

        assert!(handle.subscription.unsubscribe());
        emitter.emit("x", "ignored");

        assert!(seen.lock().unwrap().is_empty());
        assert!(emitter.channel_exists("x"));
    }

    #[test]
    fn test_dispose_tears_down_channel() {
        let emitter = ReactiveEmitter::new(true);
        let (seen, handle) = recorder(&emitter, "x");

        assert!(emitter.dispose("x"));
        assert!(!emitter.dispose("x"));
        assert!(!emitter.channel_exists("x"));

        // Stale handles are inert.
        assert_eq!(handle.channel.publish("stale"), 0);
        assert!(!handle.subscription.is_active());

        // A fresh channel is created on next use; old subscribers stay gone.
        assert_eq!(emitter.emit("x", "fresh"), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispose_all() {
        let emitter: ReactiveEmitter<u32> = ReactiveEmitter::default();
        emitter.on("a", |_| {});
        emitter.on("b", |_| {});
        emitter.on("b", |_| {});

        let stats = emitter.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.total_subscriptions, 3);

        emitter.dispose_all();
        assert!(emitter.channel_names().is_empty());
    }

    #[test]
    fn test_handler_can_emit_on_same_emitter() {
        let emitter: ReactiveEmitter<u32> = ReactiveEmitter::new(true);
        let relay = emitter.clone();
        emitter.on("in", move |v| {
            relay.emit("out", v + 1);
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        emitter.on("out", move |v| sink.lock().unwrap().push(*v));

        emitter.emit("in", 41);
        assert_eq!(*seen.lock().unwrap(), vec![42]);
    }
}
