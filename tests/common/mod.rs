//! Shared helpers for integration tests: packet encoders, fixture
//! backends built from shell one-liners, and polling utilities.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hibernate_proxy::protocol::write_varint;
use hibernate_proxy::{create_default_config, Config, HibernateProxy};
use tokio::net::{TcpListener, TcpStream};

pub const NEXT_STATE_STATUS: i32 = 1;
pub const NEXT_STATE_LOGIN: i32 = 2;

/// Frame a packet body with its VarInt length prefix
pub fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, body.len() as i32);
    out.extend_from_slice(&body);
    out
}

pub fn handshake(protocol_version: i32, address: &str, port: u16, next_state: i32) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, 0x00);
    write_varint(&mut body, protocol_version);
    write_varint(&mut body, address.len() as i32);
    body.extend_from_slice(address.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, next_state);
    frame(body)
}

pub fn login_start(username: &str) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, 0x00);
    write_varint(&mut body, username.len() as i32);
    body.extend_from_slice(username.as_bytes());
    frame(body)
}

pub fn status_request() -> Vec<u8> {
    frame(vec![0x00])
}

pub fn ping(payload: u64) -> Vec<u8> {
    let mut body = vec![0x01];
    body.extend_from_slice(&payload.to_be_bytes());
    frame(body)
}

/// Read one framed packet off a client socket, returning (raw, body)
pub async fn read_packet(stream: &mut TcpStream) -> (Vec<u8>, Vec<u8>) {
    let mut raw = Vec::new();
    let body = tokio::time::timeout(
        Duration::from_secs(5),
        hibernate_proxy::protocol::read_framed_packet(stream, &mut raw),
    )
    .await
    .expect("timed out reading a reply packet")
    .expect("reply packet must decode");
    (raw, body)
}

/// Decode the JSON payload of a status/disconnect reply body
pub fn reply_json(body: &[u8]) -> serde_json::Value {
    // body = VarInt id | VarInt len | json
    let (_, offset) = hibernate_proxy::protocol::read_varint(body, 0).unwrap();
    let (len, offset) = hibernate_proxy::protocol::read_varint(body, offset).unwrap();
    assert_eq!(len as usize, body.len() - offset);
    serde_json::from_slice(&body[offset..]).unwrap()
}

/// A config whose backend process is a `sh -c` fixture script.
///
/// `{marker}` in the script is replaced with a path under `dir`; fixtures
/// append to it so tests can count launches.
pub fn fixture_config(dir: &Path, script: &str, backend_port: u16) -> (Config, PathBuf) {
    let marker = dir.join("launches");
    let script = script.replace("{marker}", marker.to_str().unwrap());

    let mut config = create_default_config();
    config.backend.host = "127.0.0.1".to_string();
    config.backend.port = backend_port;
    config.backend.command = "sh".to_string();
    config.backend.args = vec!["-c".to_string(), script];
    config.backend.working_dir = dir.display().to_string();
    config.backend.ready_timeout_seconds = 10;
    config.proxy.connection_timeout_seconds = 5;
    (config, marker)
}

/// Fixture script: records the launch, signals readiness, then serves the
/// console until a `stop` command arrives.
pub const OBEDIENT_BACKEND: &str = "echo started >> {marker}; \
     echo 'Done (0.1s)! For help, type \"help\"'; \
     while read line; do [ \"$line\" = stop ] && exit 0; done";

/// Bind the proxy on an ephemeral port and run its accept loop
pub async fn start_proxy(proxy: &Arc<HibernateProxy>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = Arc::clone(proxy);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect to proxy")
}

/// Poll `predicate` until it holds or `deadline` elapses
pub async fn wait_until<F: Fn() -> bool>(predicate: F, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

/// Number of recorded launches in a marker file (absent file = zero)
pub fn launch_count(marker: &Path) -> usize {
    std::fs::read_to_string(marker)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}
