//! # tether-core
//!
//! Event emitters, error marshaling, and once-futures for Tether.
//!
//! This crate provides the building blocks every Tether endpoint shares:
//!
//! - **EventEmitter** - Listener lists keyed by event name
//! - **ReactiveEmitter** - One persistent channel per event name
//! - **Emitter** - Capability trait implemented by both, plus event sharing
//! - **ErrorRegistry** - Marshal and rebuild errors across the wire
//! - **OnceCache** - Deduplicated futures for the next occurrence of an event
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  once/once_all  ┌─────────────┐
//! │ EventEmitter │────────────────▶│  OnceCache  │
//! └──────────────┘                 └─────────────┘
//!        │ Emitter
//!        ▼
//! ┌──────────────┐                 ┌─────────────┐
//! │   share /    │◀───────────────▶│  Reactive   │
//! │   collect    │     Emitter     │  Emitter    │
//! └──────────────┘                 └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tether_core::{Emission, EventEmitter};
//!
//! let events = EventEmitter::new();
//! events.on("hello", |emission: &Emission| {
//!     assert_eq!(emission.first(), Some(&json!("world")));
//! });
//! assert_eq!(events.emit("hello", vec![json!("world")]), 1);
//! ```

pub mod channel;
pub mod emitter;
pub mod error_codec;
pub mod event;
pub mod once;
pub mod reactive;
pub mod share;
pub mod traits;

pub use channel::{Channel, ChannelMode, Subscription};
pub use emitter::{EventEmitter, Handler, ListenerId, WeakEventEmitter};
pub use error_codec::{marshal, ErrorKind, ErrorRegistry, RemoteError, RESERVED_FIELDS};
pub use event::{Emission, EventError, ERROR_EVENT, MESSAGE_EVENT};
pub use once::{
    once, once_all, Completer, OnceCache, OnceFuture, ONCE_ALL_NAMESPACE, ONCE_NAMESPACE,
};
pub use reactive::{Pipeable, ReactiveEmitter, ReactiveStats};
pub use share::{share_event, share_event_once};
pub use traits::Emitter;
