//! Frame Codec
//!
//! Wire format for client/server frames: length-prefixed JSON with a CRC32
//! checksum.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32          | ClientFrame or ServerFrame               |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! The length covers the payload only. The checksum is the CRC32 of the
//! payload.
//!
//! # Bad frames
//!
//! - A length above [`MAX_FRAME_SIZE`] is rejected before buffering the body
//! - A checksum mismatch or undecodable JSON drops that one frame; the
//!   decoder moves past it and the stream stays usable
//! - An oversize length cannot be skipped reliably, so the buffer is cleared

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BackendError, MuxError, ProtocolError};

/// Maximum frame size (1 MB)
///
/// Frames carry terminal traffic, never bulk data.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Frame header size: 4 bytes length + 4 bytes checksum
pub const HEADER_SIZE: usize = 8;

#[inline]
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode a frame
///
/// # Errors
///
/// [`ProtocolError::Serialization`] if JSON encoding fails,
/// [`ProtocolError::FrameTooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(json.len()));
    }

    let len = json.len() as u32;
    let checksum = compute_checksum(&json);

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Streaming frame decoder
///
/// Buffers incoming bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// - `Ok(Some(msg))`: a complete frame
    /// - `Ok(None)`: more data is needed
    /// - `Err(_)`: a bad frame was dropped; call again for the next one
    ///
    /// # Errors
    ///
    /// [`ProtocolError::FrameTooLarge`], [`ProtocolError::ChecksumMismatch`]
    /// or [`ProtocolError::Serialization`].
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_FRAME_SIZE {
            self.clear();
            return Err(ProtocolError::FrameTooLarge(len));
        }
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let payload_start = self.read_pos + HEADER_SIZE;
        let payload_end = payload_start + len;
        // The frame is consumed whatever its content turns out to be.
        self.read_pos = payload_end;
        let payload = &self.buffer[payload_start..payload_end];

        let actual = compute_checksum(payload);
        if actual != expected {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }
        serde_json::from_slice(payload)
            .map(Some)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

/// Read until one frame decodes
///
/// Bad frames are logged and skipped. `Ok(None)` on a clean EOF. Cancel-safe:
/// partial frames stay in `decoder`.
///
/// # Errors
///
/// Any I/O error from `reader`.
pub async fn read_frame<T, R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    buf: &mut [u8],
) -> std::io::Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    loop {
        match decoder.decode::<T>() {
            Ok(Some(frame)) => return Ok(Some(frame)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Dropped bad frame");
                continue;
            }
        }
        let n = reader.read(buf).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.push(&buf[..n]);
    }
}

/// Encode and write one frame
///
/// # Errors
///
/// [`MuxError::Protocol`] if the frame cannot be encoded,
/// [`MuxError::Backend`] if the write fails.
pub async fn write_frame<T, W>(writer: &mut W, frame: &T) -> Result<(), MuxError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let bytes = encode(frame)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| MuxError::Backend(BackendError::Io(e)))
}
