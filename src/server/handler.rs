//! Application hook trait
//!
//! The relay's only extension point. Authentication, key validation, and
//! stream accounting live behind this trait; the wire protocol itself does
//! not. All methods default to accepting, so `struct MyHandler;` plus the
//! hooks you care about is a complete integration.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::amf::AmfObject;

/// Result of an authorization hook
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// Accept the request
    Accept,
    /// Reject with a reason; the session is closed
    Reject(String),
}

impl AuthResult {
    /// Check if the result is Accept
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }
}

/// Hooks called by the relay at session milestones
///
/// The `"live"` application gate is enforced by the relay itself before
/// `on_connect` runs; handlers can only tighten access further.
#[async_trait]
pub trait RtmpHandler: Send + Sync + 'static {
    /// Called when a TCP connection is accepted; return false to drop it
    async fn on_connection(&self, _session_id: u64, _peer_addr: SocketAddr) -> bool {
        true
    }

    /// Called on `connect` after the application name check
    async fn on_connect(&self, _session_id: u64, _app: &str) -> AuthResult {
        AuthResult::Accept
    }

    /// Called on `publish` with the stream path
    async fn on_publish(&self, _session_id: u64, _path: &str) -> AuthResult {
        AuthResult::Accept
    }

    /// Called on `play`/`play2` with the requested path
    async fn on_play(&self, _session_id: u64, _path: &str) -> AuthResult {
        AuthResult::Accept
    }

    /// Called when the publisher posts stream metadata
    async fn on_metadata(&self, _session_id: u64, _metadata: &AmfObject) {}

    /// Called when the connection closes for any reason
    async fn on_disconnect(&self, _session_id: u64) {}
}

/// A handler that accepts everything and logs milestones
pub struct LoggingHandler;

#[async_trait]
impl RtmpHandler for LoggingHandler {
    async fn on_connection(&self, session_id: u64, peer_addr: SocketAddr) -> bool {
        tracing::info!(session_id, peer = %peer_addr, "New connection");
        true
    }

    async fn on_connect(&self, session_id: u64, app: &str) -> AuthResult {
        tracing::info!(session_id, app = %app, "Connect request");
        AuthResult::Accept
    }

    async fn on_publish(&self, session_id: u64, path: &str) -> AuthResult {
        tracing::info!(session_id, path = %path, "Publish request");
        AuthResult::Accept
    }

    async fn on_play(&self, session_id: u64, path: &str) -> AuthResult {
        tracing::info!(session_id, path = %path, "Play request");
        AuthResult::Accept
    }

    async fn on_metadata(&self, session_id: u64, metadata: &AmfObject) {
        tracing::debug!(
            session_id,
            keys = ?metadata.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            "Metadata received"
        );
    }

    async fn on_disconnect(&self, session_id: u64) {
        tracing::info!(session_id, "Connection closed");
    }
}
