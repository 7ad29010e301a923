//! Reply construction for the non-proxied paths
//!
//! While the backend is hibernating the proxy answers in its stead, so
//! these frames must be byte-exact for unmodified clients: a status
//! response wrapping a JSON payload for INFO probes, and a disconnect
//! packet carrying a JSON text for JOIN attempts.

use serde_json::json;

use super::varint::write_varint;
use crate::constants::protocol::HANDSHAKE_PACKET_ID;

/// Frame a packet body with its VarInt length prefix
fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, body.len() as i32);
    out.extend_from_slice(&body);
    out
}

/// Wrap a JSON string into a `VarInt id | VarInt len | bytes` packet body
fn json_packet(packet_id: i32, payload: &str) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, packet_id);
    write_varint(&mut body, payload.len() as i32);
    body.extend_from_slice(payload.as_bytes());
    body
}

/// Build the framed status response sent to an INFO probe.
///
/// `description` carries the canned text (hibernating, starting, ...)
/// shown in the client's server list.
pub fn status_reply(version_name: &str, protocol: i32, description: &str) -> Vec<u8> {
    let payload = json!({
        "version": { "name": version_name, "protocol": protocol },
        "players": { "max": 0, "online": 0 },
        "description": { "text": description },
    })
    .to_string();
    frame(json_packet(HANDSHAKE_PACKET_ID, &payload))
}

/// Build the framed disconnect packet sent to a JOIN attempt.
///
/// The text appears on the client's loading screen.
pub fn disconnect_reply(text: &str) -> Vec<u8> {
    let payload = json!({ "text": text }).to_string();
    frame(json_packet(HANDSHAKE_PACKET_ID, &payload))
}
