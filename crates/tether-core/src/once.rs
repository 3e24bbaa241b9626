//! Shared once-futures.
//!
//! [`OnceCache`] deduplicates "wait for the next occurrence" requests: while a
//! future for a key is pending, every caller gets a clone of the same shared
//! future and only the first request creates an underlying subscription. The
//! entry is evicted at the moment the future settles, before any waiter sees
//! the result.

use crate::emitter::EventEmitter;
use crate::event::{Emission, EventError, ERROR_EVENT};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Cache namespace used by [`once`].
pub const ONCE_NAMESPACE: &str = "once";

/// Cache namespace used by [`once_all`].
pub const ONCE_ALL_NAMESPACE: &str = "once_all";

/// A future shared by every waiter of one cache entry.
pub type OnceFuture<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: String,
    event: String,
}

impl CacheKey {
    fn new(namespace: &str, event: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            event: event.to_string(),
        }
    }
}

type Entries<T, E> = DashMap<CacheKey, OnceFuture<T, E>>;

/// Side table of pending once-futures, owned by the emitter that hosts it.
pub struct OnceCache<T, E> {
    entries: Arc<Entries<T, E>>,
}

impl<T, E> OnceCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Get the pending future for `(namespace, event)`, or create one.
    ///
    /// `subscribe` runs only when no entry exists. It receives the
    /// [`Completer`] that settles the new future and must arrange for exactly
    /// one of its methods to be called eventually.
    pub fn get_or_create<F>(&self, namespace: &str, event: &str, subscribe: F) -> OnceFuture<T, E>
    where
        F: FnOnce(Completer<T, E>),
    {
        let key = CacheKey::new(namespace, event);
        let (sender, receiver) = oneshot::channel();

        let shared = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                trace!(namespace, event, "Joining pending once-future");
                return entry.get().clone();
            }
            Entry::Vacant(entry) => {
                let shared = async move {
                    match receiver.await {
                        Ok(result) => result,
                        // Completer dropped without settling.
                        Err(_) => future::pending().await,
                    }
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        trace!(namespace, event, "Creating once-future");
        subscribe(Completer {
            key,
            entries: Arc::downgrade(&self.entries),
            sender: Some(sender),
        });

        shared
    }

    /// Check if a future is pending for `(namespace, event)`.
    #[must_use]
    pub fn is_pending(&self, namespace: &str, event: &str) -> bool {
        self.entries.contains_key(&CacheKey::new(namespace, event))
    }

    /// Number of pending futures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T, E> Default for OnceCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for OnceCache<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceCache")
            .field("pending", &self.entries.len())
            .finish()
    }
}

/// Settles one once-future.
///
/// Settling consumes the completer, so a future settles at most once. Dropping
/// it unsettled evicts the entry and leaves its waiters pending.
pub struct Completer<T, E> {
    key: CacheKey,
    entries: Weak<Entries<T, E>>,
    sender: Option<oneshot::Sender<Result<T, E>>>,
}

impl<T, E> Completer<T, E> {
    /// Resolve the future with `value`.
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    /// Reject the future with `error`.
    pub fn reject(self, error: E) {
        self.settle(Err(error));
    }

    /// Settle the future with `result`.
    pub fn settle(mut self, result: Result<T, E>) {
        self.evict();
        if let Some(sender) = self.sender.take() {
            trace!(namespace = %self.key.namespace, event = %self.key.event, "Once-future settled");
            // Every waiter may already be gone.
            let _ = sender.send(result);
        }
    }

    fn evict(&self) {
        if let Some(entries) = self.entries.upgrade() {
            entries.remove(&self.key);
        }
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            debug!(
                namespace = %self.key.namespace,
                event = %self.key.event,
                "Completer dropped without settling"
            );
            self.evict();
        }
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("namespace", &self.key.namespace)
            .field("event", &self.key.event)
            .field("settled", &self.sender.is_none())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum ArgsMode {
    First,
    All,
}

impl ArgsMode {
    fn namespace(self) -> &'static str {
        match self {
            ArgsMode::First => ONCE_NAMESPACE,
            ArgsMode::All => ONCE_ALL_NAMESPACE,
        }
    }

    fn collect(self, args: &[Value]) -> Value {
        match self {
            ArgsMode::First => args.first().cloned().unwrap_or(Value::Null),
            ArgsMode::All => Value::Array(args.to_vec()),
        }
    }
}

/// Wait for the next `event` on `source` and settle with its first argument.
///
/// Waiting on the reserved `error` event rejects with the raised error; a plain
/// value raised there is wrapped in [`EventError::Value`]. Concurrent calls for
/// the same event share one listener and one settlement.
pub fn once<S>(source: &S, event: &str) -> OnceFuture<Value, EventError>
where
    S: AsRef<EventEmitter> + ?Sized,
{
    wait_once(source.as_ref(), event, ArgsMode::First)
}

/// Like [`once`], but settles with every positional argument as an array.
pub fn once_all<S>(source: &S, event: &str) -> OnceFuture<Value, EventError>
where
    S: AsRef<EventEmitter> + ?Sized,
{
    wait_once(source.as_ref(), event, ArgsMode::All)
}

fn wait_once(emitter: &EventEmitter, event: &str, mode: ArgsMode) -> OnceFuture<Value, EventError> {
    emitter
        .once_cache()
        .get_or_create(mode.namespace(), event, |completer| {
            let reserved = event == ERROR_EVENT;
            let slot = Mutex::new(Some(completer));

            emitter.once(event, move |emission| {
                let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                let Some(completer) = taken else {
                    return;
                };

                match emission {
                    Emission::Error(error) => completer.reject(error.clone()),
                    Emission::Args(args) if reserved => {
                        completer.reject(EventError::Value(mode.collect(args)));
                    }
                    Emission::Args(args) => completer.resolve(mode.collect(args)),
                }
            });
        })
}
