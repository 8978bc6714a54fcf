//! RTMP chunk stream codec
//!
//! Messages are split into chunks so that control traffic can interleave
//! with large media frames. Each chunk starts with a flags byte whose two
//! high bits select the header variant and whose low six bits are the
//! chunk stream id; short variants inherit the omitted fields from the
//! previous message on the same chunk stream.
//!
//! ```text
//! Variant | Header | Fields
//! 0       | 12 B   | flags, timestamp(3 BE), length(3 BE), type(1), endpoint(4 LE)
//! 1       |  8 B   | flags, ts-delta(3 BE), length(3 BE), type(1)
//! 2       |  4 B   | flags, ts-delta(3 BE)
//! 3       |  1 B   | flags
//! ```
//!
//! The endpoint (message stream id) is the one little-endian field in an
//! otherwise big-endian header. Interop quirk kept from the wire dialect:
//! variant 1/2 timestamps are *added* to the previous timestamp even
//! though the field is nominally absolute.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::DEFAULT_CHUNK_SIZE;
use crate::protocol::message::Message;

/// Total header length per variant, indexed by the flags byte's high bits
const HEADER_LENGTHS: [usize; 4] = [12, 8, 4, 1];

/// Raw 24-bit timestamp value reserved for the extended-timestamp escape
const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Per-chunk-stream reassembly state
///
/// Survives message completion so that a later variant-3 chunk can start
/// an identical message by inheriting every field.
#[derive(Debug, Default)]
struct ChunkStreamState {
    msg_type: u8,
    endpoint: u32,
    timestamp: u32,
    expected_len: u32,
    partial: BytesMut,
}

/// Chunk stream decoder
///
/// Feed it the session's accumulated read buffer; it consumes whole chunks
/// only, leaving partial ones untouched until more data arrives.
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u8, ChunkStreamState>,
}

impl ChunkDecoder {
    /// Create a decoder at the protocol-default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Replace the read chunk size (peer sent Set Chunk Size)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size;
    }

    /// Current read chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Consume chunks from the buffer until a message completes
    ///
    /// Returns `Ok(Some(message))` when a chunk completed a message and
    /// `Ok(None)` when the remaining bytes do not yet hold a whole chunk;
    /// partial chunks are never consumed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            let before = buf.len();
            if let Some(msg) = self.decode_chunk(buf)? {
                return Ok(Some(msg));
            }
            if buf.len() == before {
                return Ok(None);
            }
        }
    }

    /// Consume at most one chunk
    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let flags = buf[0];
        let variant = flags >> 6;
        let csid = flags & 0x3f;
        let header_len = HEADER_LENGTHS[variant as usize];

        if buf.len() < header_len {
            return Ok(None);
        }

        let state = self.streams.entry(csid).or_default();

        if header_len >= 8 {
            let declared = read_u24(&buf[4..7]);
            if (declared as usize) < state.partial.len() {
                return Err(ProtocolError::MessageLengthShrunk {
                    declared,
                    assembled: state.partial.len() as u32,
                }
                .into());
            }
            state.expected_len = declared;
            state.msg_type = buf[7];
        }
        if header_len >= 12 {
            state.endpoint = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        }
        if header_len >= 4 {
            let mut ts = read_u24(&buf[1..4]);
            if ts == EXTENDED_TIMESTAMP {
                return Err(ProtocolError::ExtendedTimestamp.into());
            }
            if header_len < 12 {
                ts = ts.wrapping_add(state.timestamp);
            }
            state.timestamp = ts;
        }

        if state.expected_len == 0 {
            return Err(ProtocolError::ChunkWithoutHeader(csid).into());
        }

        let chunk_len =
            (state.expected_len as usize - state.partial.len()).min(self.chunk_size as usize);
        if buf.len() < header_len + chunk_len {
            return Ok(None);
        }

        state
            .partial
            .extend_from_slice(&buf[header_len..header_len + chunk_len]);
        buf.advance(header_len + chunk_len);

        if state.partial.len() == state.expected_len as usize {
            let payload = state.partial.split().freeze();
            return Ok(Some(Message::new(
                state.msg_type,
                state.endpoint,
                state.timestamp,
                payload,
            )));
        }

        Ok(None)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk stream encoder
///
/// Emits one 12-byte variant-0 header per message and 1-byte variant-3
/// headers for continuations, splitting payloads at the write chunk size.
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    /// Create an encoder at the protocol-default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Replace the write chunk size (after announcing it to the peer)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size;
    }

    /// Current write chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message onto the given chunk stream
    pub fn encode(&self, msg: &Message, csid: u8, buf: &mut BytesMut) {
        buf.put_u8(csid & 0x3f);
        put_u24(buf, msg.timestamp);
        put_u24(buf, msg.payload.len() as u32);
        buf.put_u8(msg.type_id);
        buf.put_u32_le(msg.endpoint);

        let payload = &msg.payload;
        let mut pos = 0;
        while pos < payload.len() {
            if pos > 0 {
                buf.put_u8(0xc0 | (csid & 0x3f));
            }
            let n = (payload.len() - pos).min(self.chunk_size as usize);
            buf.put_slice(&payload[pos..pos + n]);
            pos += n;
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a 24-bit big-endian value
fn read_u24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

/// Write a 24-bit big-endian value
fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::constants::{CSID_STREAM, MSG_VIDEO, STREAM_ENDPOINT};
    use bytes::Bytes;

    fn video(len: usize, timestamp: u32) -> Message {
        Message::new(
            MSG_VIDEO,
            STREAM_ENDPOINT,
            timestamp,
            Bytes::from(vec![0x27; len]),
        )
    }

    #[test]
    fn test_wire_size() {
        // ceil(L/C) chunks: one 12-byte header plus one flags byte per
        // continuation chunk
        let encoder = ChunkEncoder::new();
        for len in [1usize, 127, 128, 129, 300, 1000] {
            let mut buf = BytesMut::new();
            encoder.encode(&video(len, 0), CSID_STREAM, &mut buf);
            let chunks = len.div_ceil(DEFAULT_CHUNK_SIZE as usize);
            assert_eq!(buf.len(), 12 + (chunks - 1) + len, "len {}", len);
        }
    }

    #[test]
    fn test_roundtrip_single_chunk() {
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let msg = video(100, 40);
        let mut buf = BytesMut::new();
        encoder.encode(&msg, CSID_STREAM, &mut buf);

        let out = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(out.type_id, MSG_VIDEO);
        assert_eq!(out.endpoint, STREAM_ENDPOINT);
        assert_eq!(out.timestamp, 40);
        assert_eq!(out.payload, msg.payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_multi_chunk() {
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let msg = video(1000, 0);
        let mut buf = BytesMut::new();
        encoder.encode(&msg, CSID_STREAM, &mut buf);

        let mut out = None;
        while !buf.is_empty() {
            if let Some(m) = decoder.decode(&mut buf).unwrap() {
                out = Some(m);
            }
        }
        assert_eq!(out.unwrap().payload.len(), 1000);
    }

    #[test]
    fn test_byte_at_a_time_never_produces_spurious_messages() {
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let mut wire = BytesMut::new();
        encoder.encode(&video(200, 10), CSID_STREAM, &mut wire);
        encoder.encode(&video(50, 20), CSID_STREAM, &mut wire);

        let mut buf = BytesMut::new();
        let mut assembled = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            while let Some(m) = decoder.decode(&mut buf).unwrap() {
                assembled.push(m);
            }
        }
        assert_eq!(assembled.len(), 2);
        assert_eq!(assembled[0].payload.len(), 200);
        assert_eq!(assembled[1].payload.len(), 50);
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        // two messages interleaved on distinct chunk stream ids assemble
        // independently of chunk arrival order
        let mut decoder = ChunkDecoder::new();
        let encoder = ChunkEncoder::new();

        let a = Message::new(MSG_VIDEO, STREAM_ENDPOINT, 0, Bytes::from(vec![1u8; 200]));
        let b = Message::new(MSG_VIDEO, STREAM_ENDPOINT, 0, Bytes::from(vec![2u8; 200]));

        let mut wire_a = BytesMut::new();
        encoder.encode(&a, 4, &mut wire_a);
        let mut wire_b = BytesMut::new();
        encoder.encode(&b, 5, &mut wire_b);

        // chunk boundaries: 12+128 header+first, then 1+72 continuation
        let a1 = wire_a.split_to(12 + 128);
        let b1 = wire_b.split_to(12 + 128);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a1);
        buf.extend_from_slice(&b1);
        buf.extend_from_slice(&wire_b);
        buf.extend_from_slice(&wire_a);

        let mut assembled = Vec::new();
        while let Some(m) = decoder.decode(&mut buf).unwrap() {
            assembled.push(m);
        }
        assert_eq!(assembled.len(), 2);
        assert_eq!(assembled[0].payload[0], 2);
        assert_eq!(assembled[1].payload[0], 1);
    }

    #[test]
    fn test_renegotiated_chunk_size() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        encoder.set_chunk_size(4096);
        decoder.set_chunk_size(4096);

        let msg = video(10_000, 0);
        let mut buf = BytesMut::new();
        encoder.encode(&msg, CSID_STREAM, &mut buf);
        // 3 chunks of up to 4096
        assert_eq!(buf.len(), 12 + 2 + 10_000);

        let mut out = None;
        while let Some(m) = decoder.decode(&mut buf).unwrap() {
            out = Some(m);
        }
        assert_eq!(out.unwrap().payload, msg.payload);
    }

    #[test]
    fn test_short_header_timestamp_adds_to_previous() {
        let mut decoder = ChunkDecoder::new();

        let mut buf = BytesMut::new();
        // variant 0, csid 4, ts 100, len 1, type 9, endpoint LE
        buf.put_u8(0x04);
        put_u24(&mut buf, 100);
        put_u24(&mut buf, 1);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(STREAM_ENDPOINT);
        buf.put_u8(0xaa);

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.timestamp, 100);

        // variant 2, csid 4, ts field 40: added to the previous timestamp
        buf.put_u8(0x84);
        put_u24(&mut buf, 40);
        buf.put_u8(0xbb);

        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.timestamp, 140);
        assert_eq!(second.payload[0], 0xbb);
    }

    #[test]
    fn test_variant3_inherits_everything() {
        let mut decoder = ChunkDecoder::new();
        let encoder = ChunkEncoder::new();

        let mut buf = BytesMut::new();
        encoder.encode(&video(10, 5), CSID_STREAM, &mut buf);
        decoder.decode(&mut buf).unwrap().unwrap();

        // a bare variant-3 chunk repeats the cached header
        buf.put_u8(0xc0 | CSID_STREAM);
        buf.put_slice(&[0x27; 10]);

        let repeat = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(repeat.type_id, MSG_VIDEO);
        assert_eq!(repeat.timestamp, 5);
        assert_eq!(repeat.payload.len(), 10);
    }

    #[test]
    fn test_variant3_without_state_is_an_error() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0xc0 | 7);

        match decoder.decode(&mut buf) {
            Err(Error::Protocol(ProtocolError::ChunkWithoutHeader(7))) => {}
            other => panic!("expected headerless chunk error, got {:?}", other),
        }
    }

    #[test]
    fn test_extended_timestamp_rejected() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0x04);
        put_u24(&mut buf, EXTENDED_TIMESTAMP);
        put_u24(&mut buf, 1);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(STREAM_ENDPOINT);
        buf.put_u8(0x00);

        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::ExtendedTimestamp))
        ));
    }

    #[test]
    fn test_shrinking_length_is_an_error() {
        let mut decoder = ChunkDecoder::new();

        // first chunk of a 200-byte message: 128 bytes assembled
        let mut buf = BytesMut::new();
        buf.put_u8(0x04);
        put_u24(&mut buf, 0);
        put_u24(&mut buf, 200);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(STREAM_ENDPOINT);
        buf.put_slice(&[0u8; 128]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        // variant 1 header shrinking the length below what is assembled
        buf.put_u8(0x44);
        put_u24(&mut buf, 0);
        put_u24(&mut buf, 100);
        buf.put_u8(MSG_VIDEO);

        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::MessageLengthShrunk { .. }))
        ));
    }

    #[test]
    fn test_incomplete_header_consumes_nothing() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0x04);
        put_u24(&mut buf, 0);

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }
}
