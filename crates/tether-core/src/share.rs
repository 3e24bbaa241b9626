//! Forwarding events from one emitter to another.

use crate::traits::Emitter;
use tracing::debug;

/// Re-emit every `event` raised on `source` on `target` under the same name.
///
/// Returns the handle of the listener installed on `source`.
pub fn share_event<S, T>(event: &str, source: &S, target: &T) -> S::Handle
where
    S: Emitter + ?Sized,
    S::Item: Clone,
    T: Emitter<Item = S::Item> + Clone + Send + Sync + 'static,
{
    debug!(event, "Sharing event");
    let target = target.clone();
    let name = event.to_string();
    source.on(event, move |item: &S::Item| {
        target.emit(&name, item.clone());
    })
}

/// Like [`share_event`], but forwards a single occurrence.
pub fn share_event_once<S, T>(event: &str, source: &S, target: &T) -> S::Handle
where
    S: Emitter + ?Sized,
    S::Item: Clone,
    T: Emitter<Item = S::Item> + Clone + Send + Sync + 'static,
{
    debug!(event, "Sharing next event");
    let target = target.clone();
    let name = event.to_string();
    source.once(event, move |item: &S::Item| {
        target.emit(&name, item.clone());
    })
}
