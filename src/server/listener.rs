//! RTMP relay listener
//!
//! Binds the port, accepts connections, and spawns one task per session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::relay::RelayHub;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::handler::RtmpHandler;

/// RTMP relay server
pub struct RtmpServer<H: RtmpHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    hub: Arc<RelayHub>,
    next_session_id: AtomicU64,
}

impl<H: RtmpHandler> RtmpServer<H> {
    /// Create a new server with the given configuration and handler
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let hub = Arc::new(RelayHub::new(config.broadcast_capacity));
        Self {
            config,
            handler: Arc::new(handler),
            hub,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Run the server
    ///
    /// Blocks for the lifetime of the process. A bind failure is the only
    /// fatal error; per-session failures are logged and confined.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "RTMP relay listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.spawn_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn spawn_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(session_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);
        let hub = Arc::clone(&self.hub);

        tokio::spawn(async move {
            let mut connection =
                Connection::new(session_id, socket, peer_addr, config, handler, hub);

            if let Err(e) = connection.run().await {
                tracing::debug!(session_id, error = %e, "Session ended with error");
            }

            tracing::debug!(session_id, "Connection closed");
        });
    }

    /// Shared relay hub, mainly useful for inspection in tests
    pub fn hub(&self) -> Arc<RelayHub> {
        Arc::clone(&self.hub)
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
