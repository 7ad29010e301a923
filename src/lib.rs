//! # Hibernation Proxy Library
//!
//! A transparent front-end proxy for a long-lived game server process.
//! The backend is expensive to keep running idle, so the proxy keeps it
//! stopped (or OS-suspended) whenever no player is connected and warms it
//! on demand the moment a legitimate client wants in, without the client
//! perceiving the backend as unavailable.
//!
//! ## Architecture
//!
//! The proxy is organized into several modules for clean separation of
//! concerns:
//!
//! - **classifier**: decodes the first packet(s) of a connection into a
//!   status probe, a join attempt, a foreign protocol, or garbage
//! - **session**: per-connection policy, choosing between canned replies
//!   and a real proxy pair
//! - **relay**: the bidirectional byte pump with deadlines and accounting
//! - **lifecycle**: the state machine driving the backend between
//!   offline, starting, online, stopping and suspended
//! - **stats**: process-wide counters and the latched major error
//! - **protocol**: VarInt framing, handshake decoding, reply construction
//! - **config**: TOML configuration loading and validation
//! - **telemetry**: optional data-usage and resource-usage printers
//!
//! ## Design Philosophy
//!
//! The proxy speaks just enough of the backend's handshake protocol to
//! classify intent; everything after the first packet is relayed
//! untouched. Exactly one backend instance is managed, and every byte the
//! classifier consumes is replayed to it verbatim when a proxy opens.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

// Module declarations
mod classifier;
mod config;
pub mod constants;
mod error;
mod lifecycle;
pub mod logging;
pub mod protocol;
mod relay;
mod session;
mod stats;
pub mod telemetry;

// Public exports
pub use classifier::{classify, ClientRequest, RequestKind};
pub use config::{create_default_config, load_config, Config};
pub use error::LifecycleError;
pub use lifecycle::LifecycleController;
pub use stats::{Stats, StatsRegistry, Status};

/// The assembled proxy: immutable config, shared stats and the backend
/// lifecycle controller
pub struct HibernateProxy {
    config: Arc<Config>,
    stats: Arc<StatsRegistry>,
    controller: Arc<LifecycleController>,
}

impl HibernateProxy {
    /// Validate the configuration and wire up the subsystems
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let stats = Arc::new(StatsRegistry::new());
        let controller = LifecycleController::new(Arc::clone(&config), Arc::clone(&stats));
        Ok(Arc::new(Self {
            config,
            stats,
            controller,
        }))
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    /// Bring the backend online (see [`LifecycleController::warm`])
    pub async fn warm(&self) -> std::result::Result<(), LifecycleError> {
        self.controller.warm().await
    }

    /// Print a message on the backend's in-game chat
    pub async fn tell_raw(&self, message: &str) -> std::result::Result<(), LifecycleError> {
        self.controller.tell_raw(message).await
    }

    /// Handle one accepted client connection
    pub async fn handle_client(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        session::handle_connection(Arc::clone(self), stream, addr).await
    }

    /// Accept loop: one task per client connection
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "listening for client connections on {}",
            listener.local_addr()?
        );
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let proxy = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = proxy.handle_client(stream, addr).await {
                            error!("error handling client {addr}: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {e}");
                }
            }
        }
    }

    /// Stop the backend gracefully before the proxy exits
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_creation_with_defaults() {
        let proxy = HibernateProxy::new(create_default_config()).expect("valid defaults");
        assert_eq!(proxy.stats().status(), Status::Offline);
        assert_eq!(proxy.config().backend.port, 25565);
    }

    #[test]
    fn test_proxy_creation_rejects_invalid_config() {
        let mut config = create_default_config();
        config.backend.command = String::new();
        assert!(HibernateProxy::new(config).is_err());
    }
}
