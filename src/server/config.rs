//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::OUTBOUND_CHUNK_SIZE;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Application name accepted in `connect`
    pub app_name: String,

    /// Chunk size announced for server-to-client writes
    pub chunk_size: u32,

    /// Events buffered per subscriber before it counts as lagging
    pub broadcast_capacity: usize,

    /// Consecutive lag events after which a subscriber is disconnected
    pub max_consecutive_lags: u32,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1935".parse().unwrap(),
            app_name: "live".to_string(),
            chunk_size: OUTBOUND_CHUNK_SIZE,
            broadcast_capacity: 512,
            max_consecutive_lags: 8,
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the accepted application name
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the outbound chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the per-subscriber event buffer depth
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
