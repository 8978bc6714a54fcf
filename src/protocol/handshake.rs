//! RTMP plaintext handshake, server side
//!
//! Three packets each way:
//!
//! ```text
//! Client                                   Server
//!   |-- 0x03 ------------------------------>|
//!   |<-- 0x03 + server signature (1536) ----|
//!   |-- client signature (1536) ----------->|
//!   |<-- echo of client signature (1536) ---|
//!   |-- echo of server signature (1536) --->|
//! ```
//!
//! The server signature starts with `0x03`, seven zero bytes, then 1528
//! random bytes. The client's final echo must reproduce the random region
//! byte for byte or the session is dropped before any RTMP message is
//! processed.
//!
//! The state machine is fed from the connection's read buffer, so a slow
//! peer mid-handshake never stalls other sessions.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::error::HandshakeError;

/// Signature packet length
pub const SIGNATURE_LEN: usize = 1536;

/// Random region of a signature (everything after the 8 header bytes)
const RANDOM_LEN: usize = SIGNATURE_LEN - 8;

/// Bytes exchanged in each direction by a completed handshake; seeds the
/// session's sequence counters
pub const HANDSHAKE_WIRE_LEN: u32 = (1 + 2 * SIGNATURE_LEN) as u32;

const PLAINTEXT_VERSION: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitVersion,
    AwaitClientSignature,
    AwaitEcho,
    Done,
}

/// Server handshake state machine
#[derive(Debug)]
pub struct Handshake {
    state: State,
    signature: [u8; SIGNATURE_LEN],
}

impl Handshake {
    /// Create a handshake with a fresh random signature
    pub fn new() -> Self {
        let mut signature = [0u8; SIGNATURE_LEN];
        signature[0] = PLAINTEXT_VERSION;
        rand::thread_rng().fill(&mut signature[8..]);
        Self {
            state: State::AwaitVersion,
            signature,
        }
    }

    /// True once the peer's echo has been verified
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Bytes the current state needs before it can make progress
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            State::AwaitVersion => 1,
            State::AwaitClientSignature | State::AwaitEcho => SIGNATURE_LEN,
            State::Done => 0,
        }
    }

    /// Process buffered bytes, returning data to send to the peer
    ///
    /// Consumes nothing until a full packet for the current state is
    /// available.
    pub fn process(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Bytes>, HandshakeError> {
        match self.state {
            State::AwaitVersion => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let version = buf.split_to(1)[0];
                if version != PLAINTEXT_VERSION {
                    return Err(HandshakeError::UnsupportedVersion(version));
                }
                let mut response = BytesMut::with_capacity(1 + SIGNATURE_LEN);
                response.put_u8(version);
                response.put_slice(&self.signature);
                self.state = State::AwaitClientSignature;
                Ok(Some(response.freeze()))
            }
            State::AwaitClientSignature => {
                if buf.len() < SIGNATURE_LEN {
                    return Ok(None);
                }
                // echo the client's signature back verbatim
                let echo = buf.split_to(SIGNATURE_LEN).freeze();
                self.state = State::AwaitEcho;
                Ok(Some(echo))
            }
            State::AwaitEcho => {
                if buf.len() < SIGNATURE_LEN {
                    return Ok(None);
                }
                let echo = buf.split_to(SIGNATURE_LEN);
                if echo[8..] != self.signature[8..] {
                    return Err(HandshakeError::SignatureMismatch);
                }
                self.state = State::Done;
                Ok(None)
            }
            State::Done => Ok(None),
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
