//! Channel abstraction for the reactive emitter.
//!
//! A channel is a named publish point with its own set of subscriptions. In
//! [`ChannelMode::ReplayLast`] it also remembers the most recent value and hands
//! it to every late subscriber.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace};

/// How a channel treats subscribers that arrive after a value was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Deliver to current subscribers only.
    Immediate,
    /// Also replay the last value to late subscribers.
    ReplayLast,
}

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    once: bool,
    handler: Observer<T>,
}

struct ChannelState<T> {
    subscribers: Vec<Subscriber<T>>,
    last: Option<T>,
    next_id: u64,
    closed: bool,
}

struct ChannelInner<T> {
    name: String,
    mode: ChannelMode,
    state: Mutex<ChannelState<T>>,
}

impl<T> ChannelInner<T> {
    fn state(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A named channel. Clones share the same subscriptions.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Channel<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new channel.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: ChannelMode) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                mode,
                state: Mutex::new(ChannelState {
                    subscribers: Vec::new(),
                    last: None,
                    next_id: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the channel mode.
    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        self.inner.mode
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state().subscribers.len()
    }

    /// Check if the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    /// Publish a value to this channel.
    ///
    /// Returns the number of subscribers that received the value. Publishing
    /// on a closed channel does nothing.
    pub fn publish(&self, value: T) -> usize {
        let handlers: Vec<Observer<T>> = {
            let mut state = self.inner.state();
            if state.closed {
                trace!(channel = %self.inner.name, "Publish on closed channel ignored");
                return 0;
            }
            if self.inner.mode == ChannelMode::ReplayLast {
                state.last = Some(value.clone());
            }
            let handlers = state.subscribers.iter().map(|s| s.handler.clone()).collect();
            state.subscribers.retain(|s| !s.once);
            handlers
        };

        trace!(channel = %self.inner.name, subscribers = handlers.len(), "Publishing value");
        for handler in &handlers {
            handler(&value);
        }
        handlers.len()
    }

    /// Subscribe to every value.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach(Arc::new(handler), false)
    }

    /// Subscribe to the next value only.
    pub fn subscribe_once<F>(&self, handler: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach(Arc::new(handler), true)
    }

    fn attach(&self, handler: Observer<T>, once: bool) -> Subscription<T> {
        let (id, replay) = {
            let mut state = self.inner.state();
            let id = state.next_id;
            state.next_id += 1;

            if state.closed {
                debug!(channel = %self.inner.name, "Subscribe on closed channel ignored");
                return Subscription::new(&self.inner, id);
            }

            let replay = state.last.clone();
            // A once-subscriber served by the replay is already done.
            if !(once && replay.is_some()) {
                state.subscribers.push(Subscriber {
                    id,
                    once,
                    handler: handler.clone(),
                });
            }
            (id, replay)
        };

        if let Some(value) = replay {
            trace!(channel = %self.inner.name, "Replaying last value");
            handler(&value);
        }

        Subscription::new(&self.inner, id)
    }

    /// Unsubscribe everyone and refuse further publishes.
    ///
    /// Returns the number of subscriptions dropped.
    pub fn close(&self) -> usize {
        let mut state = self.inner.state();
        state.closed = true;
        state.last = None;
        let dropped = state.subscribers.len();
        state.subscribers.clear();
        debug!(channel = %self.inner.name, dropped, "Channel closed");
        dropped
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("subscribers", &state.subscribers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A handle to one subscription on a channel.
pub struct Subscription<T> {
    channel: Weak<ChannelInner<T>>,
    id: u64,
}

impl<T> Subscription<T> {
    fn new(channel: &Arc<ChannelInner<T>>, id: u64) -> Self {
        Self {
            channel: Arc::downgrade(channel),
            id,
        }
    }

    /// Stop receiving values.
    ///
    /// Returns `true` if the subscription was still active.
    pub fn unsubscribe(&self) -> bool {
        let Some(channel) = self.channel.upgrade() else {
            return false;
        };
        let mut state = channel.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != self.id);
        state.subscribers.len() != before
    }

    /// Check if the subscription still receives values.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.channel
            .upgrade()
            .map(|channel| channel.state().subscribers.iter().any(|s| s.id == self.id))
            .unwrap_or(false)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_channel_creation() {
        let channel: Channel<u32> = Channel::new("test:room", ChannelMode::Immediate);
        assert_eq!(channel.name(), "test:room");
        assert_eq!(channel.subscriber_count(), 0);
        assert!(!channel.is_closed());
    }

    #[test]
    fn test_channel_subscribe_unsubscribe() {
        let channel: Channel<u32> = Channel::new("test", ChannelMode::Immediate);

        let sub1 = channel.subscribe(|_| {});
        let _sub2 = channel.subscribe(|_| {});
        assert_eq!(channel.subscriber_count(), 2);
        assert!(sub1.is_active());

        assert!(sub1.unsubscribe());
        assert_eq!(channel.subscriber_count(), 1);
        assert!(!sub1.is_active());

        // Unsubscribing twice
        assert!(!sub1.unsubscribe());
    }

    #[test]
    fn test_immediate_mode_does_not_replay() {
        let channel = Channel::new("test", ChannelMode::Immediate);
        assert_eq!(channel.publish(1u32), 0);

        let (seen, handler) = collector();
        channel.subscribe(handler);
        assert_eq!(channel.publish(2), 1);

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_replay_mode_replays_last_value() {
        let channel = Channel::new("test", ChannelMode::ReplayLast);
        channel.publish(1u32);
        channel.publish(2);

        let (seen, handler) = collector();
        channel.subscribe(handler);
        channel.publish(3);

        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_subscribe_once() {
        let channel = Channel::new("test", ChannelMode::Immediate);
        let (seen, handler) = collector();
        let sub = channel.subscribe_once(handler);

        channel.publish(1u32);
        channel.publish(2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_subscribe_once_served_by_replay() {
        let channel = Channel::new("test", ChannelMode::ReplayLast);
        channel.publish(7u32);

        let (seen, handler) = collector();
        let sub = channel.subscribe_once(handler);
        channel.publish(8);

        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_close_drops_subscribers_and_ignores_publish() {
        let channel = Channel::new("test", ChannelMode::ReplayLast);
        let (seen, handler) = collector();
        let sub = channel.subscribe(handler);

        assert_eq!(channel.close(), 1);
        assert!(channel.is_closed());
        assert!(!sub.is_active());
        assert_eq!(channel.publish(1u32), 0);
        assert!(seen.lock().unwrap().is_empty());
    }
}
