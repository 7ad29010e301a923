//! Framed packet reads and handshake decoding
//!
//! The first packet of every connection is a handshake declaring the
//! client's intent (status probe or login). Decoding is non-destructive:
//! every byte consumed from the socket is also appended to a replay
//! buffer, so a proxied connection can hand the backend exactly what the
//! client sent.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::varint::{read_varint, read_varint_stream};
use super::ProtocolError;
use crate::constants::buffer::MAX_PACKET_LEN;
use crate::constants::protocol::{HANDSHAKE_PACKET_ID, NEXT_STATE_LOGIN, NEXT_STATE_STATUS};

/// A decoded handshake packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

/// Read one `VarInt length | body` frame, appending all consumed bytes
/// (length prefix included) to `raw`. Returns the body.
pub async fn read_framed_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    raw: &mut Vec<u8>,
) -> Result<Vec<u8>, ProtocolError> {
    let length = read_varint_stream(reader, raw).await?;
    if length <= 0 || length > MAX_PACKET_LEN {
        return Err(ProtocolError::InvalidLength(length));
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;
    raw.extend_from_slice(&body);
    Ok(body)
}

/// Decode a length-prefixed UTF-8 string field
fn read_string(data: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let (len, offset) = read_varint(data, offset)?;
    if len < 0 {
        return Err(ProtocolError::Malformed("negative string length"));
    }
    let end = offset
        .checked_add(len as usize)
        .ok_or(ProtocolError::UnexpectedEnd)?;
    let bytes = data.get(offset..end).ok_or(ProtocolError::UnexpectedEnd)?;
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ProtocolError::Malformed("string is not UTF-8"))?;
    Ok((text.to_string(), end))
}

/// Decode a handshake packet body (`VarInt id | fields`).
///
/// Trailing bytes after the next-state field are tolerated; modded
/// clients append markers there.
pub fn parse_handshake(body: &[u8]) -> Result<Handshake, ProtocolError> {
    let (packet_id, offset) = read_varint(body, 0)?;
    if packet_id != HANDSHAKE_PACKET_ID {
        return Err(ProtocolError::Malformed("unexpected packet id"));
    }

    let (protocol_version, offset) = read_varint(body, offset)?;
    let (server_address, offset) = read_string(body, offset)?;
    let port_bytes = body
        .get(offset..offset + 2)
        .ok_or(ProtocolError::UnexpectedEnd)?;
    let server_port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    let (next_state, _) = read_varint(body, offset + 2)?;

    if next_state != NEXT_STATE_STATUS && next_state != NEXT_STATE_LOGIN {
        return Err(ProtocolError::Malformed("invalid next state"));
    }

    Ok(Handshake {
        protocol_version,
        server_address,
        server_port,
        next_state,
    })
}

/// Decode a login-start packet body, returning the username.
///
/// Fields after the username (profile UUID on newer protocols) are
/// ignored.
pub fn parse_login_start(body: &[u8]) -> Result<String, ProtocolError> {
    let (packet_id, offset) = read_varint(body, 0)?;
    if packet_id != HANDSHAKE_PACKET_ID {
        return Err(ProtocolError::Malformed("unexpected packet id"));
    }
    let (username, _) = read_string(body, offset)?;
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testutil::{encode_handshake, encode_login_start};
    use crate::protocol::write_varint;

    #[tokio::test]
    async fn test_framed_read_is_byte_preserving() {
        let frame = encode_handshake(765, "mc.example.com", 25565, NEXT_STATE_STATUS);
        let mut reader = std::io::Cursor::new(frame.clone());
        let mut raw = Vec::new();

        let body = read_framed_packet(&mut reader, &mut raw).await.unwrap();
        assert_eq!(raw, frame, "replay buffer must match the wire bytes");
        assert_eq!(body.len() + 1, frame.len(), "one-byte length prefix");
    }

    #[tokio::test]
    async fn test_framed_read_rejects_oversized_length() {
        let mut frame = Vec::new();
        write_varint(&mut frame, MAX_PACKET_LEN + 1);
        let mut reader = std::io::Cursor::new(frame);
        let mut raw = Vec::new();

        let err = read_framed_packet(&mut reader, &mut raw).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength(_)));
    }

    #[tokio::test]
    async fn test_framed_read_rejects_zero_length() {
        let mut reader = std::io::Cursor::new(vec![0x00]);
        let mut raw = Vec::new();
        let err = read_framed_packet(&mut reader, &mut raw).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength(0)));
    }

    #[test]
    fn test_parse_handshake_status() {
        let frame = encode_handshake(765, "mc.example.com", 25565, NEXT_STATE_STATUS);
        let body = &frame[1..]; // strip the one-byte length prefix
        let handshake = parse_handshake(body).unwrap();

        assert_eq!(handshake.protocol_version, 765);
        assert_eq!(handshake.server_address, "mc.example.com");
        assert_eq!(handshake.server_port, 25565);
        assert_eq!(handshake.next_state, NEXT_STATE_STATUS);
    }

    #[test]
    fn test_parse_handshake_login() {
        let frame = encode_handshake(340, "localhost", 25555, NEXT_STATE_LOGIN);
        let handshake = parse_handshake(&frame[1..]).unwrap();
        assert_eq!(handshake.next_state, NEXT_STATE_LOGIN);
        assert_eq!(handshake.protocol_version, 340);
    }

    #[test]
    fn test_parse_handshake_tolerates_trailing_marker() {
        // forge appends \0FML\0 style markers after the declared fields
        let mut frame = encode_handshake(765, "mc.example.com", 25565, NEXT_STATE_LOGIN);
        let extra = b"\0FML\0";
        frame.extend_from_slice(extra);
        // rebuild the frame with a corrected length prefix
        let body_len = frame.len() - 1;
        let mut fixed = Vec::new();
        write_varint(&mut fixed, body_len as i32);
        fixed.extend_from_slice(&frame[1..]);

        let handshake = parse_handshake(&fixed[1..]).unwrap();
        assert_eq!(handshake.server_address, "mc.example.com");
    }

    #[test]
    fn test_parse_handshake_rejects_foreign_id() {
        let mut body = Vec::new();
        write_varint(&mut body, 0x42);
        body.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            parse_handshake(&body),
            Err(ProtocolError::Malformed("unexpected packet id"))
        ));
    }

    #[test]
    fn test_parse_handshake_rejects_bad_next_state() {
        let frame = encode_handshake(765, "mc.example.com", 25565, 9);
        assert!(matches!(
            parse_handshake(&frame[1..]),
            Err(ProtocolError::Malformed("invalid next state"))
        ));
    }

    #[test]
    fn test_parse_login_start() {
        let frame = encode_login_start("alice");
        let username = parse_login_start(&frame[1..]).unwrap();
        assert_eq!(username, "alice");
    }

    #[test]
    fn test_parse_login_start_truncated() {
        let frame = encode_login_start("alice");
        let body = &frame[1..frame.len() - 2];
        assert!(parse_login_start(body).is_err());
    }
}
