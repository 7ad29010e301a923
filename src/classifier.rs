//! First-packet classification
//!
//! Reads just enough of a new connection to decide what the client wants:
//! a status probe, a login attempt, some other protocol, or garbage. The
//! consumed bytes are kept verbatim so that a proxied connection can be
//! replayed to the backend exactly as the client sent it.

use tokio::io::AsyncRead;
use tracing::debug;

use crate::constants::protocol::{NEXT_STATE_LOGIN, NEXT_STATE_STATUS};
use crate::protocol::{parse_handshake, parse_login_start, read_framed_packet};

/// What the first packet declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Status probe (handshake next-state 1)
    Info,
    /// Login attempt (handshake next-state 2)
    Join,
    /// Valid framing, but not a handshake we recognize
    Foreign,
    /// Broken framing
    Unknown,
}

/// The transient per-connection request record
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub kind: RequestKind,
    /// Every byte consumed from the socket, verbatim, for replay
    pub raw: Vec<u8>,
    /// Username extracted from the login-start packet (JOIN only)
    pub username: Option<String>,
    pub protocol_version: Option<i32>,
}

impl ClientRequest {
    fn unknown(raw: Vec<u8>) -> Self {
        Self {
            kind: RequestKind::Unknown,
            raw,
            username: None,
            protocol_version: None,
        }
    }

    fn foreign(raw: Vec<u8>) -> Self {
        Self {
            kind: RequestKind::Foreign,
            raw,
            username: None,
            protocol_version: None,
        }
    }
}

/// Classify the first packet(s) of a connection.
///
/// Never fails: undecodable input degrades to `Foreign` or `Unknown`,
/// with whatever bytes were consumed preserved in `raw`. The caller is
/// expected to bound this with a read deadline.
pub async fn classify<R: AsyncRead + Unpin>(reader: &mut R) -> ClientRequest {
    let mut raw = Vec::new();

    let body = match read_framed_packet(reader, &mut raw).await {
        Ok(body) => body,
        Err(e) => {
            debug!("first packet framing rejected: {e}");
            return ClientRequest::unknown(raw);
        }
    };

    let handshake = match parse_handshake(&body) {
        Ok(handshake) => handshake,
        Err(e) => {
            debug!("first packet is not a handshake: {e}");
            return ClientRequest::foreign(raw);
        }
    };

    match handshake.next_state {
        NEXT_STATE_STATUS => ClientRequest {
            kind: RequestKind::Info,
            raw,
            username: None,
            protocol_version: Some(handshake.protocol_version),
        },
        NEXT_STATE_LOGIN => {
            // the login-start packet follows on the same stream; read it
            // so the username is known and the replay buffer is complete
            let username = match read_framed_packet(reader, &mut raw).await {
                Ok(login_body) => parse_login_start(&login_body).ok(),
                Err(e) => {
                    debug!("login-start packet missing: {e}");
                    None
                }
            };
            ClientRequest {
                kind: RequestKind::Join,
                raw,
                username,
                protocol_version: Some(handshake.protocol_version),
            }
        }
        _ => ClientRequest::foreign(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::protocol::{NEXT_STATE_LOGIN, NEXT_STATE_STATUS};
    use crate::protocol::testutil::{encode_handshake, encode_login_start};

    async fn classify_bytes(bytes: Vec<u8>) -> ClientRequest {
        let mut reader = std::io::Cursor::new(bytes);
        classify(&mut reader).await
    }

    #[tokio::test]
    async fn test_info_request() {
        let wire = encode_handshake(765, "mc.example.com", 25565, NEXT_STATE_STATUS);
        let request = classify_bytes(wire.clone()).await;

        assert_eq!(request.kind, RequestKind::Info);
        assert_eq!(request.raw, wire);
        assert_eq!(request.protocol_version, Some(765));
        assert!(request.username.is_none());
    }

    #[tokio::test]
    async fn test_join_request_extracts_username_and_preserves_bytes() {
        let mut wire = encode_handshake(765, "mc.example.com", 25565, NEXT_STATE_LOGIN);
        wire.extend_from_slice(&encode_login_start("alice"));
        let request = classify_bytes(wire.clone()).await;

        assert_eq!(request.kind, RequestKind::Join);
        assert_eq!(request.username.as_deref(), Some("alice"));
        assert_eq!(request.raw, wire, "replay must include both packets");
    }

    #[tokio::test]
    async fn test_join_without_login_start_keeps_join_kind() {
        let wire = encode_handshake(765, "mc.example.com", 25565, NEXT_STATE_LOGIN);
        let request = classify_bytes(wire.clone()).await;

        assert_eq!(request.kind, RequestKind::Join);
        assert!(request.username.is_none());
        assert_eq!(request.raw, wire);
    }

    #[tokio::test]
    async fn test_foreign_packet_id() {
        // valid frame, but the body does not start with the handshake id
        let mut body = Vec::new();
        crate::protocol::write_varint(&mut body, 0x2a);
        body.extend_from_slice(b"not a handshake");
        let wire = crate::protocol::testutil::frame(body);
        let request = classify_bytes(wire.clone()).await;

        assert_eq!(request.kind, RequestKind::Foreign);
        assert_eq!(request.raw, wire);
    }

    #[tokio::test]
    async fn test_unknown_on_broken_framing() {
        // five continuation bytes: VarInt never terminates
        let wire = vec![0x80, 0x80, 0x80, 0x80, 0x80];
        let request = classify_bytes(wire.clone()).await;

        assert_eq!(request.kind, RequestKind::Unknown);
        assert_eq!(request.raw, wire);
    }

    #[tokio::test]
    async fn test_unknown_on_immediate_eof() {
        let request = classify_bytes(Vec::new()).await;
        assert_eq!(request.kind, RequestKind::Unknown);
        assert!(request.raw.is_empty());
    }
}
