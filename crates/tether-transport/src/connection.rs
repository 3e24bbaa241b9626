//! Byte-stream connection.
//!
//! A [`Connection`] owns both halves of a stream. A read task feeds every chunk
//! through a [`FrameDecoder`] and raises `message` for each decoded value; a
//! write task drains an outbound queue, so [`Connection::send`] never blocks.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core::{Emission, EventEmitter, EventError, ERROR_EVENT, MESSAGE_EVENT};
use tether_protocol::{codec, Decoded, FrameDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::traits::{ByteStream, ConnectionId, TransportError};

/// Raised once the read side has ended and the connection is dead.
pub const END_EVENT: &str = "end";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted incoming frame in bytes.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: codec::MAX_FRAME_SIZE,
        }
    }
}

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

/// A framed JSON connection over a byte stream.
///
/// Cheap to clone; clones share the stream and the emitter.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    events: EventEmitter,
    outbound: UnboundedSender<Outbound>,
    dead: Arc<AtomicBool>,
}

impl Connection {
    /// Wrap `stream` and start reading.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S: ByteStream>(stream: S) -> Self {
        Self::with_emitter(stream, EventEmitter::new())
    }

    /// Wrap `stream`, raising notifications on `events`.
    ///
    /// Listeners registered on `events` beforehand are guaranteed to see the
    /// first frame.
    pub fn with_emitter<S: ByteStream>(stream: S, events: EventEmitter) -> Self {
        Self::with_config(stream, events, ConnectionConfig::default())
    }

    /// Wrap `stream` with a custom configuration.
    pub fn with_config<S: ByteStream>(
        stream: S,
        events: EventEmitter,
        config: ConnectionConfig,
    ) -> Self {
        let id = ConnectionId::generate();
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let dead = Arc::new(AtomicBool::new(false));

        debug!(connection = %id, max_frame_size = config.max_frame_size, "Connection opened");

        tokio::spawn(read_loop(
            id.clone(),
            reader,
            FrameDecoder::with_max_frame_size(config.max_frame_size),
            events.clone(),
            dead.clone(),
            outbound.clone(),
        ));
        tokio::spawn(write_loop(id.clone(), writer, outbound_rx, dead.clone()));

        Self {
            id,
            events,
            outbound,
            dead,
        }
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The emitter notifications are raised on.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Check if the connection can no longer write.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Encode `value` as one frame and queue it for writing.
    ///
    /// Returns `false`, without touching the stream, when the connection is
    /// dead or the value cannot be encoded.
    pub fn send<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match self.try_send(value) {
            Ok(()) => true,
            Err(e) => {
                debug!(connection = %self.id, error = %e, "Send failed");
                false
            }
        }
    }

    /// Like [`send`](Self::send), but reports why a frame was not queued.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] when the connection is dead
    /// and [`TransportError::Protocol`] when encoding fails.
    pub fn try_send<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), TransportError> {
        if self.is_dead() {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = codec::encode(value)?;
        trace!(connection = %self.id, bytes = frame.len(), "Queueing frame");
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// End the write side after every frame already queued.
    ///
    /// Returns `false` if the connection was already dead.
    pub fn close(&self) -> bool {
        if self.dead.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(connection = %self.id, "Closing connection");
        self.outbound.send(Outbound::Shutdown).is_ok()
    }
}

impl AsRef<EventEmitter> for Connection {
    fn as_ref(&self) -> &EventEmitter {
        &self.events
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}

/// Read loop: decodes frames from the stream and raises notifications.
async fn read_loop<R: AsyncRead + Unpin>(
    id: ConnectionId,
    mut reader: R,
    mut decoder: FrameDecoder,
    events: EventEmitter,
    dead: Arc<AtomicBool>,
    outbound: UnboundedSender<Outbound>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(connection = %id, "Stream ended");
                break;
            }
            Ok(n) => {
                trace!(connection = %id, bytes = n, "Read chunk");
                for decoded in decoder.feed(&buf[..n]) {
                    dispatch(&id, &events, decoded);
                }
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Read error");
                break;
            }
        }
    }

    for decoded in decoder.finish() {
        dispatch(&id, &events, decoded);
    }

    if !dead.swap(true, Ordering::SeqCst) {
        // Our write half follows the remote end down.
        let _ = outbound.send(Outbound::Shutdown);
    }
    events.emit(END_EVENT, Vec::new());
}

fn dispatch(id: &ConnectionId, events: &EventEmitter, decoded: Decoded) {
    match decoded {
        Ok(value) => {
            events.emit(MESSAGE_EVENT, vec![value]);
        }
        Err(e) => {
            debug!(connection = %id, error = %e, "Frame error");
            events.emit(ERROR_EVENT, Emission::Error(EventError::Frame(e)));
        }
    }
}

/// Write loop: drains the outbound queue into the stream.
async fn write_loop<W: AsyncWrite + Unpin>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: UnboundedReceiver<Outbound>,
    dead: Arc<AtomicBool>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(data) => {
                let result = match writer.write_all(&data).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(connection = %id, error = %e, "Write error");
                    dead.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Outbound::Shutdown => {
                if let Err(e) = writer.shutdown().await {
                    debug!(connection = %id, error = %e, "Shutdown error");
                }
                break;
            }
        }
    }
    dead.store(true, Ordering::SeqCst);
    debug!(connection = %id, "Write side closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tether_core::once;
    use tether_protocol::FrameError;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_send_writes_one_frame_per_value() {
        let (local, remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local);

        assert!(conn.send(&json!({"hello": "world"})));
        assert!(conn.send(&json!([1, "two\nlines"])));

        let mut lines = BufReader::new(remote).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"hello":"world"}"#
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"[1,"two\nlines"]"#
        );
    }

    #[tokio::test]
    async fn test_split_chunks_raise_message() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local);
        let message = once(&conn, MESSAGE_EVENT);

        remote.write_all(b"{\"type\":\"ev").await.unwrap();
        tokio::task::yield_now().await;
        remote.write_all(b"ent\",\"n\":1}\n").await.unwrap();

        assert_eq!(
            message.await.unwrap(),
            json!({"type": "event", "n": 1})
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_raises_error_and_reading_continues() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local);
        let error = once(&conn, ERROR_EVENT);
        let message = once(&conn, MESSAGE_EVENT);

        remote.write_all(b"{oops\n{\"ok\":true}\n").await.unwrap();

        match error.await {
            Err(EventError::Frame(FrameError::Malformed { text, .. })) => {
                assert_eq!(text, "{oops");
            }
            other => panic!("Expected frame error, got {:?}", other),
        }
        assert_eq!(message.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_remote_end_makes_connection_dead() {
        let (local, remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local);
        let ended = once(&conn, END_EVENT);
        assert!(!conn.is_dead());

        drop(remote);
        tokio::time::timeout(Duration::from_secs(1), ended)
            .await
            .unwrap()
            .unwrap();

        assert!(conn.is_dead());
        assert!(!conn.send(&json!({"late": true})));
        assert!(matches!(
            conn.try_send(&json!(null)),
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!conn.close());
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames_then_ends_stream() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let conn = Connection::new(local);

        assert!(conn.send(&json!(1)));
        assert!(conn.send(&json!(2)));
        assert!(conn.close());
        assert!(conn.is_dead());
        assert!(!conn.close());

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"1\n2\n");
    }

    #[tokio::test]
    async fn test_listeners_on_supplied_emitter_see_first_frame() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let events = EventEmitter::new();
        let first = Arc::new(std::sync::Mutex::new(None));
        let slot = first.clone();
        events.once(MESSAGE_EVENT, move |e: &Emission| {
            *slot.lock().unwrap() = e.first().cloned();
        });

        let conn = Connection::with_emitter(local, events);
        let ended = once(&conn, END_EVENT);
        remote.write_all(b"\"first\"\n").await.unwrap();
        drop(remote);
        ended.await.unwrap();

        assert_eq!(*first.lock().unwrap(), Some(json!("first")));
    }
}
