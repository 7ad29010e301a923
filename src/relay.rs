//! Bidirectional byte relay between a client and the backend
//!
//! One proxy pair is two relay tasks, each pumping one direction with a
//! small buffer and per-iteration deadlines. Whichever direction fails
//! first half-closes its peer, and the deadline bounds how long the other
//! direction can outlive it. The backend-to-client relay of a join pair
//! owns the connection count: it increments before the first byte flows
//! and re-arms the idle-freeze timer after both ends are torn down.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::classifier::RequestKind;
use crate::config::Config;
use crate::constants::buffer::RELAY_SIZE;
use crate::constants::timeout::BACKEND_DIAL;
use crate::lifecycle::LifecycleController;
use crate::protocol::disconnect_reply;
use crate::stats::{Direction, StatsRegistry};

/// Open a proxy pair for a classified request.
///
/// Dials the backend, replays the preserved first packet so the backend
/// sees exactly what the client sent, then pumps both directions until
/// either side goes away. On dial failure the client gets a join-shaped
/// error reply and the connection is dropped.
pub async fn open_proxy(
    mut client: TcpStream,
    request_kind: RequestKind,
    first_packet: &[u8],
    config: &Arc<Config>,
    stats: &Arc<StatsRegistry>,
    controller: &Arc<LifecycleController>,
) {
    let backend_addr = config.backend_addr();
    let backend = match timeout(BACKEND_DIAL, TcpStream::connect(&backend_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("backend dial to {backend_addr} failed: {e}");
            let reply = disconnect_reply(
                "can't connect to the backend... check that it is running on the configured port",
            );
            let _ = client.write_all(&reply).await;
            return;
        }
        Err(_) => {
            warn!("backend dial to {backend_addr} timed out");
            let reply = disconnect_reply(
                "can't connect to the backend... check that it is running on the configured port",
            );
            let _ = client.write_all(&reply).await;
            return;
        }
    };

    let _ = client.set_nodelay(true);
    let _ = backend.set_nodelay(true);

    let mut backend = backend;
    if let Err(e) = backend.write_all(first_packet).await {
        warn!("replaying first packet to backend failed: {e}");
        return;
    }

    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let client_to_server = tokio::spawn(relay(
        client_read,
        backend_write,
        Direction::ClientToServer,
        Arc::clone(config),
        Arc::clone(stats),
    ));

    // the server->client direction owns the join accounting, so the pair
    // is counted exactly once
    let counted = request_kind == RequestKind::Join;
    let server_to_client = {
        let config = Arc::clone(config);
        let stats = Arc::clone(stats);
        let controller = Arc::clone(controller);
        tokio::spawn(async move {
            if counted {
                let count = stats.conn_connected();
                info!("a client connected to the backend ({count} active)");
            }
            relay(
                backend_read,
                client_write,
                Direction::ServerToClient,
                config,
                Arc::clone(&stats),
            )
            .await;
            if counted {
                let count = stats.conn_disconnected();
                info!("a client disconnected from the backend ({count} active)");
                controller.freeze_schedule();
            }
        })
    };

    let _ = tokio::join!(client_to_server, server_to_client);
    debug!("proxy pair closed");
}

/// Pump one direction until EOF, an error, or a stalled deadline
async fn relay(
    mut source: OwnedReadHalf,
    mut destination: OwnedWriteHalf,
    direction: Direction,
    config: Arc<Config>,
    stats: Arc<StatsRegistry>,
) {
    let deadline = config.connection_timeout();
    let mut buf = [0u8; RELAY_SIZE];

    loop {
        let read = match timeout(deadline, source.read(&mut buf)).await {
            Ok(Ok(0)) => {
                debug!("closing {} (EOF)", direction.as_str());
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("closing {} (read: {e})", direction.as_str());
                break;
            }
            Err(_) => {
                debug!("closing {} (idle for {deadline:?})", direction.as_str());
                break;
            }
        };

        match timeout(deadline, destination.write_all(&buf[..read])).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("closing {} (write: {e})", direction.as_str());
                break;
            }
            Err(_) => {
                debug!("closing {} (write stalled for {deadline:?})", direction.as_str());
                break;
            }
        }

        if config.proxy.show_internet_usage {
            stats.add_bytes(direction, read);
        }
    }

    // half-close so the peer relay observes EOF instead of waiting out
    // its own deadline
    let _ = destination.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_relay_copies_and_accounts_bytes() {
        let mut config = crate::config::create_default_config();
        config.proxy.show_internet_usage = true;
        config.proxy.connection_timeout_seconds = 5;
        let config = Arc::new(config);
        let stats = Arc::new(StatsRegistry::new());

        let (client_a, client_b) = socket_pair().await;
        let (server_a, server_b) = socket_pair().await;

        let (read_half, _write_unused) = client_b.into_split();
        let (_read_unused, write_half) = server_a.into_split();

        let pump = tokio::spawn(relay(
            read_half,
            write_half,
            Direction::ClientToServer,
            Arc::clone(&config),
            Arc::clone(&stats),
        ));

        let mut sender = client_a;
        sender.write_all(b"hello backend").await.unwrap();
        drop(sender); // EOF ends the relay

        pump.await.unwrap();

        let mut receiver = server_b;
        let mut received = Vec::new();
        receiver.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello backend");

        let (_, to_server) = stats.take_bytes();
        assert_eq!(to_server, 13.0);
    }

    #[tokio::test]
    async fn test_relay_deadline_bounds_teardown_against_a_silent_peer() {
        let mut config = crate::config::create_default_config();
        config.proxy.connection_timeout_seconds = 1;
        let config = Arc::new(config);
        let stats = Arc::new(StatsRegistry::new());

        let (client_a, client_b) = socket_pair().await;
        let (server_a, server_b) = socket_pair().await;

        let (read_half, _client_write) = client_b.into_split();
        let (_server_read, write_half) = server_a.into_split();

        let started = tokio::time::Instant::now();
        let pump = tokio::spawn(relay(
            read_half,
            write_half,
            Direction::ClientToServer,
            config,
            stats,
        ));

        // both peers stay open and completely silent: no data, no FIN.
        // only the per-iteration deadline can end the relay.
        pump.await.unwrap();
        let elapsed = started.elapsed();
        assert!(
            elapsed >= std::time::Duration::from_millis(900),
            "relay ended before the deadline could have fired ({elapsed:?})"
        );
        assert!(
            elapsed < std::time::Duration::from_secs(3),
            "relay outlived the configured deadline ({elapsed:?})"
        );

        drop(client_a);
        drop(server_b);
    }

    #[tokio::test]
    async fn test_relay_half_closes_destination_on_source_eof() {
        let mut config = crate::config::create_default_config();
        config.proxy.connection_timeout_seconds = 5;
        let config = Arc::new(config);
        let stats = Arc::new(StatsRegistry::new());

        let (client_a, client_b) = socket_pair().await;
        let (server_a, server_b) = socket_pair().await;

        let (read_half, _) = client_b.into_split();
        let (_, write_half) = server_a.into_split();

        let pump = tokio::spawn(relay(
            read_half,
            write_half,
            Direction::ClientToServer,
            config,
            stats,
        ));

        drop(client_a);
        pump.await.unwrap();

        // the far side of the destination socket must observe EOF
        let mut receiver = server_b;
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.read(&mut buf))
            .await
            .expect("peer must see the half-close")
            .unwrap();
        assert_eq!(n, 0);
    }
}
