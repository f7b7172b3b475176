//! Length-prefixed framing.
//!
//! Every record on the wire is a 4-byte big-endian length header followed by
//! exactly that many payload bytes. A zero length is a valid empty frame.
//! Readers never hand out a payload until all declared bytes have arrived.

use crate::error::WireError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Maximum single frame payload (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame a payload: 4-byte big-endian length + payload bytes.
///
/// Callers bound the payload size; the event codec rejects anything above
/// [`MAX_FRAME_SIZE`] before it gets here.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_FRAME_SIZE);
    let len = payload.len() as u32;
    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; FRAME_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Read one frame payload.
///
/// Returns [`WireError::ConnectionClosed`] when the stream ends cleanly on a
/// frame boundary and [`WireError::Truncated`] when it ends inside a frame.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(WireError::ConnectionClosed);
            }
            return Err(WireError::Truncated {
                read: filled,
                expected: FRAME_HEADER_LEN,
            });
        }
        filled += n;
    }

    let len = decode_length(&header) as usize;
    if len > max_size {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = reader.read(&mut body[read..]).await?;
        if n == 0 {
            return Err(WireError::Truncated {
                read,
                expected: len,
            });
        }
        read += n;
    }
    Ok(body)
}

/// Write one framed payload and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_frame(payload);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
