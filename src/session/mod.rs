//! Per-connection session state

use std::net::SocketAddr;

use crate::protocol::handshake::HANDSHAKE_WIRE_LEN;

/// Flags and counters for one connection
///
/// `playing` means the peer has issued `play`; `ready` means it has also
/// observed a keyframe and may receive video. The sequence counters are
/// cumulative wire bytes in each direction, seeded with the handshake's
/// 3073 bytes; `peer_read_seq` mirrors the peer's last BytesRead report
/// so the send-queue depth can be observed.
#[derive(Debug)]
pub struct SessionState {
    pub id: u64,
    pub peer_addr: SocketAddr,
    pub playing: bool,
    pub ready: bool,
    pub read_seq: u32,
    pub written_seq: u32,
    pub peer_read_seq: u32,
}

impl SessionState {
    /// Create state for a freshly accepted connection
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            playing: false,
            ready: false,
            read_seq: 0,
            written_seq: 0,
            peer_read_seq: 0,
        }
    }

    /// Seed the sequence counters once the handshake has completed
    pub fn complete_handshake(&mut self) {
        self.read_seq = HANDSHAKE_WIRE_LEN;
        self.written_seq = HANDSHAKE_WIRE_LEN;
    }

    /// Account bytes read from the peer
    pub fn add_read(&mut self, n: u32) {
        self.read_seq = self.read_seq.wrapping_add(n);
    }

    /// Account bytes queued toward the peer
    pub fn add_written(&mut self, n: u32) {
        self.written_seq = self.written_seq.wrapping_add(n);
    }

    /// Bytes sent but not yet acknowledged via BytesRead
    pub fn queue_depth(&self) -> u32 {
        self.written_seq.wrapping_sub(self.peer_read_seq)
    }
}
