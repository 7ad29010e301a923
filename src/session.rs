//! Per-connection policy
//!
//! One task per accepted client. The first packet is classified, then the
//! decision table below picks between a canned reply on behalf of the
//! sleeping backend and a real proxy pair:
//!
//! | request  | backend state        | action                                |
//! |----------|----------------------|---------------------------------------|
//! | any      | major error latched  | canned error reply, close             |
//! | INFO     | online               | proxy (uncounted)                     |
//! | INFO     | otherwise            | canned status reply + ping echo       |
//! | JOIN     | not whitelisted      | permission-denied disconnect          |
//! | JOIN     | online / suspended   | warm, then proxy (counted)            |
//! | JOIN     | otherwise            | warm in background, "please wait"     |
//! | FOREIGN  | online               | proxy (uncounted)                     |
//! | FOREIGN  | otherwise            | close                                 |
//! | UNKNOWN  | any                  | generic reply, close                  |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClientRequest, RequestKind};
use crate::constants::protocol::{HANDSHAKE_PACKET_ID, PING_PACKET_ID};
use crate::constants::timeout::CLASSIFY;
use crate::protocol::{disconnect_reply, read_framed_packet, read_varint, status_reply};
use crate::relay::open_proxy;
use crate::stats::Status;
use crate::HibernateProxy;

/// Handle one client connection from classification to teardown
pub(crate) async fn handle_connection(
    proxy: Arc<HibernateProxy>,
    mut client: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let request = match timeout(CLASSIFY, classify(&mut client)).await {
        Ok(request) => request,
        Err(_) => {
            debug!("classification timed out for {peer}");
            return Ok(());
        }
    };
    let address = peer.ip().to_string();

    // a latched major error overrides everything: warn the client and
    // leave the backend alone
    if let Some(err) = proxy.stats().major_error() {
        warn!("client {address} connected but the backend has a major error: {err}");
        let text = format!("backend error: {err}");
        match request.kind {
            RequestKind::Info => {
                let config = proxy.config();
                let reply =
                    status_reply(&config.backend.version, config.backend.protocol, &text);
                client.write_all(&reply).await?;
                answer_ping(&mut client).await;
            }
            RequestKind::Join | RequestKind::Unknown => {
                client.write_all(&disconnect_reply(&text)).await?;
            }
            RequestKind::Foreign => {}
        }
        info!("closing connection for {address}");
        return Ok(());
    }

    match request.kind {
        RequestKind::Info => handle_info(&proxy, client, &request, &address).await,
        RequestKind::Join => handle_join(&proxy, client, &request, &address).await,
        RequestKind::Foreign => handle_foreign(&proxy, client, &request, &address).await,
        RequestKind::Unknown => {
            info!("unknown request from {address}");
            client
                .write_all(&disconnect_reply("Client request unknown"))
                .await?;
            Ok(())
        }
    }
}

async fn handle_info(
    proxy: &Arc<HibernateProxy>,
    mut client: TcpStream,
    request: &ClientRequest,
    address: &str,
) -> Result<()> {
    let config = proxy.config();
    info!(
        "a client requested server info from {address} to {}",
        config.backend_addr()
    );

    match proxy.stats().status() {
        Status::Online => {
            open_proxy(
                client,
                request.kind,
                &request.raw,
                config,
                proxy.stats(),
                proxy.controller(),
            )
            .await;
            Ok(())
        }
        status => {
            let text = match status {
                Status::Suspended => config.messages.info_suspended.clone(),
                Status::Starting => config.messages.info_starting.clone(),
                Status::Stopping => "server is stopping...\nrefresh the page".to_string(),
                Status::Offline | Status::Online => config.messages.info_hibernation.clone(),
            };
            let reply = status_reply(&config.backend.version, config.backend.protocol, &text);
            client.write_all(&reply).await?;
            answer_ping(&mut client).await;
            info!("closing connection for {address}");
            Ok(())
        }
    }
}

async fn handle_join(
    proxy: &Arc<HibernateProxy>,
    mut client: TcpStream,
    request: &ClientRequest,
    address: &str,
) -> Result<()> {
    let config = proxy.config();
    info!(
        "a client tried to join from {address} as {:?}",
        request.username
    );

    if !config.is_whitelisted(request.username.as_deref(), address) {
        warn!(
            "join from {address} (user {:?}) rejected by whitelist",
            request.username
        );
        client
            .write_all(&disconnect_reply(
                "You don't have permission to warm this server",
            ))
            .await?;
        info!("closing connection for {address}");
        return Ok(());
    }

    match proxy.stats().status() {
        // a warm is cheap here (resume or no-op), so the join proceeds
        // straight into a proxy pair
        Status::Suspended | Status::Online => {
            if let Err(e) = proxy.controller().warm().await {
                warn!("warming for {address} failed: {e}");
                client
                    .write_all(&disconnect_reply(
                        "An error occurred while warming the server: check the proxy log",
                    ))
                    .await?;
                return Ok(());
            }
            open_proxy(
                client,
                request.kind,
                &request.raw,
                config,
                proxy.stats(),
                proxy.controller(),
            )
            .await;
            Ok(())
        }
        // a cold start takes minutes; answer right away and let the
        // client retry while the backend boots
        Status::Offline | Status::Starting | Status::Stopping => {
            let controller = Arc::clone(proxy.controller());
            tokio::spawn(async move {
                if let Err(e) = controller.warm().await {
                    warn!("background warm failed: {e}");
                }
            });

            let text = format!(
                "Server start command issued. Please wait... {}",
                proxy.stats().load_progress()
            );
            client.write_all(&disconnect_reply(&text)).await?;
            info!("closing connection for {address}");
            Ok(())
        }
    }
}

async fn handle_foreign(
    proxy: &Arc<HibernateProxy>,
    client: TcpStream,
    request: &ClientRequest,
    address: &str,
) -> Result<()> {
    match proxy.stats().status() {
        Status::Online => {
            info!("relaying foreign protocol request from {address}");
            open_proxy(
                client,
                request.kind,
                &request.raw,
                proxy.config(),
                proxy.stats(),
                proxy.controller(),
            )
            .await;
        }
        status => {
            warn!("cannot relay foreign protocol while backend is {status}");
        }
    }
    Ok(())
}

/// Finish a canned status exchange: skip the status request that follows
/// the handshake (the reply already went out) and echo the trailing ping
/// verbatim.
async fn answer_ping(client: &mut TcpStream) {
    for _ in 0..2 {
        let mut raw = Vec::new();
        let body = match timeout(CLASSIFY, read_framed_packet(client, &mut raw)).await {
            Ok(Ok(body)) => body,
            _ => return,
        };
        let Ok((packet_id, offset)) = read_varint(&body, 0) else {
            return;
        };
        if packet_id == PING_PACKET_ID && body.len() - offset == 8 {
            let _ = client.write_all(&raw).await;
            return;
        }
        if packet_id == HANDSHAKE_PACKET_ID && body.len() == offset {
            // empty status-request packet; the reply was already sent
            continue;
        }
        return;
    }
}
