//! # tether-transport
//!
//! Byte-stream connections and remote event emitters for Tether.
//!
//! - **Connection** - Framed JSON over any `AsyncRead + AsyncWrite` stream
//! - **RemoteEventEmitter** - An event emitter mirrored across a connection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tether_core::once_all;
//! use tether_transport::RemoteEventEmitter;
//!
//! # async fn example() {
//! let (a, b) = tokio::io::duplex(4096);
//! let client = RemoteEventEmitter::new(a);
//! let server = RemoteEventEmitter::new(b);
//!
//! let hello = once_all(&server, "hello");
//! client.remote_emit("hello", vec![json!("arg1"), json!("arg2")]);
//! assert_eq!(hello.await.unwrap(), json!(["arg1", "arg2"]));
//! # }
//! ```

pub mod connection;
pub mod remote;
pub mod traits;

pub use connection::{Connection, ConnectionConfig, END_EVENT};
pub use remote::RemoteEventEmitter;
pub use traits::{ByteStream, ConnectionId, TransportError};
