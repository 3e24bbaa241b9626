//! Codec for encoding and decoding Tether frames.
//!
//! A frame is one compact JSON value followed by exactly one `\n` byte. There is
//! no length prefix: the delimiter alone terminates a frame. JSON string escaping
//! guarantees the delimiter never appears inside an encoded value.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while encoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A frame that could not be turned into a value.
///
/// Framing errors are not fatal: the decoder keeps going with the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame text is not valid JSON.
    #[error("Malformed frame: {reason}")]
    Malformed {
        /// The offending raw frame text (lossy UTF-8).
        text: String,
        /// Parser message.
        reason: String,
    },

    /// A frame grew past the decoder limit before its delimiter arrived.
    #[error("Frame size {size} exceeds maximum {max}")]
    TooLarge {
        /// Bytes buffered when the limit was hit.
        size: usize,
        /// The decoder limit.
        max: usize,
    },
}

impl FrameError {
    /// Raw text of a malformed frame.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            FrameError::Malformed { text, .. } => Some(text),
            FrameError::TooLarge { .. } => None,
        }
    }
}

/// Result of decoding a single frame.
pub type Decoded = Result<Value, FrameError>;

/// Encode a value as one frame.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a value as one frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode_into<T: Serialize + ?Sized>(
    value: &T,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(value)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(payload.len() + 1);
    buf.extend_from_slice(&payload);
    buf.put_u8(DELIMITER);

    Ok(())
}

/// Decode one complete frame. A trailing delimiter is optional.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] if the text is not valid JSON.
pub fn decode(data: &[u8]) -> Decoded {
    let data = data.strip_suffix(&[DELIMITER]).unwrap_or(data);
    parse_frame(data)
}

fn parse_frame(raw: &[u8]) -> Decoded {
    serde_json::from_slice(raw).map_err(|e| FrameError::Malformed {
        text: String::from_utf8_lossy(raw).into_owned(),
        reason: e.to_string(),
    })
}

/// Incremental decoder for delimiter-terminated frames.
///
/// Chunks may split frames anywhere, including inside a multi-byte character:
/// `\n` never occurs inside a UTF-8 sequence, so splitting happens on raw bytes
/// and each complete frame is validated as a whole.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no delimiter.
    scanned: usize,
    max_frame_size: usize,
    /// Dropping the tail of an oversized frame until the next delimiter.
    discarding: bool,
}

impl FrameDecoder {
    /// Create a new decoder with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new decoder with a specific frame limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
            max_frame_size,
            discarding: false,
        }
    }

    /// Feed a chunk and return every frame it completed, in arrival order.
    ///
    /// Incomplete data stays buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut frames = Vec::new();
        let mut chunk = chunk;

        if self.discarding {
            match chunk.iter().position(|b| *b == DELIMITER) {
                Some(i) => {
                    trace!(skipped = i, "Oversized frame tail discarded");
                    self.discarding = false;
                    chunk = &chunk[i + 1..];
                }
                None => return frames,
            }
        }

        self.buf.extend_from_slice(chunk);
        self.drain(&mut frames);

        if self.buf.len() > self.max_frame_size {
            let size = self.buf.len();
            debug!(size, max = self.max_frame_size, "Frame too large, discarding");
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
            frames.push(Err(FrameError::TooLarge {
                size,
                max: self.max_frame_size,
            }));
        }

        frames
    }

    /// Signal end of stream.
    ///
    /// Runs a final pass over the buffer. An unterminated trailing frame carries
    /// no guaranteed meaning and is dropped.
    pub fn finish(&mut self) -> Vec<Decoded> {
        let mut frames = Vec::new();
        self.drain(&mut frames);

        if !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "Discarding unterminated trailing frame");
            self.buf.clear();
        }
        self.scanned = 0;
        self.discarding = false;

        frames
    }

    /// Returns true if the decoder holds part of a frame.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    fn drain(&mut self, frames: &mut Vec<Decoded>) {
        while let Some(offset) = self.buf[self.scanned..]
            .iter()
            .position(|b| *b == DELIMITER)
        {
            let end = self.scanned + offset;
            let line = self.buf.split_to(end + 1);
            self.scanned = 0;

            if end > self.max_frame_size {
                frames.push(Err(FrameError::TooLarge {
                    size: end,
                    max: self.max_frame_size,
                }));
                continue;
            }

            frames.push(parse_frame(&line[..end]));
        }
        self.scanned = self.buf.len();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
