//! Action Message Format codec
//!
//! AMF carries RPC arguments, status objects, and stream metadata over
//! RTMP. Decoding understands AMF0 plus the in-band switch to AMF3;
//! encoding always emits AMF0 (see `encode.rs`).

pub mod decode;
pub mod encode;
pub mod value;

pub use decode::Decoder;
pub use encode::{encode_all, Encoder};
pub use value::{AmfObject, AmfValue};
