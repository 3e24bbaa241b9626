//! Capability interface shared by the emitter implementations.
//!
//! [`EventEmitter`](crate::EventEmitter) keeps ad hoc listener lists;
//! [`ReactiveEmitter`](crate::ReactiveEmitter) keeps one persistent channel per
//! event name. Code written against [`Emitter`] works with either.

use crate::share::share_event;

/// A named-channel event bus.
pub trait Emitter {
    /// Value delivered to handlers.
    type Item;

    /// Returned by `on`/`once` so the caller can unsubscribe later.
    type Handle;

    /// Deliver `item` to the handlers of `event`.
    ///
    /// Returns the number of handlers called.
    fn emit(&self, event: &str, item: Self::Item) -> usize;

    /// Subscribe `handler` to `event`.
    fn on<F>(&self, event: &str, handler: F) -> Self::Handle
    where
        F: Fn(&Self::Item) + Send + Sync + 'static;

    /// Subscribe `handler` to the next occurrence of `event` only.
    fn once<F>(&self, event: &str, handler: F) -> Self::Handle
    where
        F: Fn(&Self::Item) + Send + Sync + 'static;

    /// Drop every handler of `event`.
    ///
    /// Returns `true` if there was anything to drop.
    fn dispose(&self, event: &str) -> bool;

    /// Drop every handler of every event.
    fn dispose_all(&self);

    /// Re-emit every `event` from this emitter on `target`.
    fn share<T>(&self, event: &str, target: &T) -> Self::Handle
    where
        Self: Sized,
        Self::Item: Clone,
        T: Emitter<Item = Self::Item> + Clone + Send + Sync + 'static,
    {
        share_event(event, self, target)
    }

    /// Re-emit every `event` from `source` on this emitter.
    fn collect<S>(&self, event: &str, source: &S) -> S::Handle
    where
        Self: Clone + Send + Sync + Sized + 'static,
        S: Emitter<Item = Self::Item>,
        Self::Item: Clone,
    {
        share_event(event, source, self)
    }
}
