//! Handshake wire protocol handling
//!
//! This module contains the VarInt codec, framed-packet reads, handshake
//! and login-start decoding, and construction of the byte-exact replies
//! the proxy sends on behalf of a sleeping backend.

mod handshake;
mod response;
#[cfg(test)]
pub(crate) mod testutil;
mod varint;

pub use handshake::{parse_handshake, parse_login_start, read_framed_packet, Handshake};
pub use response::{disconnect_reply, status_reply};
pub use varint::{read_varint, read_varint_stream, write_varint};

use thiserror::Error;

/// Errors produced while decoding the first packets of a connection
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A VarInt ran past its maximum encoded length
    #[error("VarInt exceeds {max} bytes", max = crate::constants::buffer::MAX_VARINT_BYTES)]
    VarIntTooLong,

    /// A frame declared a nonsensical length
    #[error("invalid packet length {0}")]
    InvalidLength(i32),

    /// The payload ended before a field was fully decoded
    #[error("unexpected end of packet")]
    UnexpectedEnd,

    /// The packet decoded, but not as the expected handshake shape
    #[error("malformed handshake: {0}")]
    Malformed(&'static str),

    /// The underlying socket failed or closed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
