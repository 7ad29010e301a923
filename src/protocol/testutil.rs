//! Packet encoders shared by unit tests

use super::varint::write_varint;
use crate::constants::protocol::HANDSHAKE_PACKET_ID;

/// Frame a packet body with its VarInt length prefix
pub(crate) fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, body.len() as i32);
    out.extend_from_slice(&body);
    out
}

/// Build a framed handshake the way a real client would
pub(crate) fn encode_handshake(
    protocol_version: i32,
    address: &str,
    port: u16,
    next_state: i32,
) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, HANDSHAKE_PACKET_ID);
    write_varint(&mut body, protocol_version);
    write_varint(&mut body, address.len() as i32);
    body.extend_from_slice(address.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, next_state);
    frame(body)
}

/// Build a framed login-start packet
pub(crate) fn encode_login_start(username: &str) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, HANDSHAKE_PACKET_ID);
    write_varint(&mut body, username.len() as i32);
    body.extend_from_slice(username.as_bytes());
    frame(body)
}
