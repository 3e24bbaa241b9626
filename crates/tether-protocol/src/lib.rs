//! # tether-protocol
//!
//! Wire protocol definitions for Tether remote events.
//!
//! Frames are compact JSON values terminated by a single `\n`. Each frame
//! carries one [`Envelope`]: either a named event with positional arguments or
//! an error raised on the reserved `error` event.
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, Envelope, FrameDecoder};
//! use serde_json::json;
//!
//! let envelope = Envelope::event("hello", vec![json!("arg1"), json!("arg2")]);
//! let encoded = codec::encode(&envelope).unwrap();
//!
//! let mut decoder = FrameDecoder::new();
//! let frames = decoder.feed(&encoded);
//! let value = frames.into_iter().next().unwrap().unwrap();
//! assert_eq!(Envelope::from_value(&value), Some(envelope));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, Decoded, FrameDecoder, FrameError, ProtocolError};
pub use envelope::{Envelope, WireError, ERROR_EVENT, EVENT_TYPE};
