//! RTMP wire stack: constants, chunking, handshake, message model

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use handshake::Handshake;
pub use message::Message;
