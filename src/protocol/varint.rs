//! VarInt codec
//!
//! The wire format frames everything with VarInts: little-endian base-128
//! with a continuation bit, at most five bytes for a 32-bit value. Two
//! decoding forms are provided: one over an in-memory slice (packet
//! payloads) and one over an async stream (the length prefix itself),
//! which appends every consumed byte to a replay buffer so the original
//! framing can be forwarded to the backend untouched.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::ProtocolError;
use crate::constants::buffer::MAX_VARINT_BYTES;

/// Append the VarInt encoding of `value` to `buf`
pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut remaining = value as u32;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if remaining == 0 {
            return;
        }
    }
}

/// Decode a VarInt from `data` starting at `offset`.
///
/// Returns the value and the offset of the first byte after it.
pub fn read_varint(data: &[u8], offset: usize) -> Result<(i32, usize), ProtocolError> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let byte = *data
            .get(offset + i)
            .ok_or(ProtocolError::UnexpectedEnd)?;
        value |= u32::from(byte & 0x7f) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value as i32, offset + i + 1));
        }
    }
    Err(ProtocolError::VarIntTooLong)
}

/// Decode a VarInt from an async stream, pushing each consumed byte onto
/// `raw` so the caller can replay the exact bytes later.
pub async fn read_varint_stream<R: AsyncRead + Unpin>(
    reader: &mut R,
    raw: &mut Vec<u8>,
) -> Result<i32, ProtocolError> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        raw.push(byte[0]);
        value |= u32::from(byte[0] & 0x7f) << (7 * i as u32);
        if byte[0] & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProtocolError::VarIntTooLong)
}
