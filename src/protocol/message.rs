//! RTMP message model and payload helpers
//!
//! A message is what the chunk layer assembles and what the dispatcher
//! consumes: a type id, the endpoint (message stream id) it is scoped to,
//! a timestamp, and an opaque payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::amf::{encode_all, AmfValue};
use crate::error::{AmfError, ProtocolError};
use crate::protocol::constants::{CMD_RESULT, UC_CLEAR_STREAM};

/// A complete RTMP message
#[derive(Debug, Clone)]
pub struct Message {
    /// Message type id
    pub type_id: u8,
    /// Message stream id; 0 for the control channel, 1337 for the stream
    pub endpoint: u32,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Opaque payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message
    pub fn new(type_id: u8, endpoint: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            type_id,
            endpoint,
            timestamp,
            payload,
        }
    }
}

/// Read the single u32 payload of SetChunkSize and BytesRead messages
pub fn parse_u32_payload(payload: &[u8]) -> Result<u32, ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::ShortPayload);
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Event type of a user-control payload, when present
pub fn user_control_event(payload: &[u8]) -> Option<u16> {
    if payload.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([payload[0], payload[1]]))
}

/// Build a SetChunkSize payload
pub fn set_chunk_size_payload(size: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(size);
    buf.freeze()
}

/// Build the CLEAR_STREAM user-control payload for a stream id
pub fn clear_stream_payload(stream_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(UC_CLEAR_STREAM);
    buf.put_u32(stream_id);
    buf.freeze()
}

/// Build an invoke payload: method name, transaction id, arguments
pub fn invoke_payload(name: &str, txid: f64, args: &[AmfValue]) -> Result<Bytes, AmfError> {
    let mut values = Vec::with_capacity(2 + args.len());
    values.push(AmfValue::String(name.to_string()));
    values.push(AmfValue::Number(txid));
    values.extend_from_slice(args);
    encode_all(&values)
}

/// Build a `_result` payload for a transaction
pub fn result_payload(txid: f64, reply: AmfValue, status: AmfValue) -> Result<Bytes, AmfError> {
    invoke_payload(CMD_RESULT, txid, &[reply, status])
}

/// Build a notify payload: handler name followed by its values
pub fn notify_payload(name: &str, values: &[AmfValue]) -> Result<Bytes, AmfError> {
    let mut all = Vec::with_capacity(1 + values.len());
    all.push(AmfValue::String(name.to_string()));
    all.extend_from_slice(values);
    encode_all(&all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{AmfObject, Decoder};

    #[test]
    fn test_u32_payload() {
        assert_eq!(parse_u32_payload(&[0x00, 0x00, 0x10, 0x00]).unwrap(), 4096);
        assert!(parse_u32_payload(&[0x00, 0x00]).is_err());
    }

    #[test]
    fn test_clear_stream_payload_layout() {
        let payload = clear_stream_payload(1337);
        assert_eq!(&payload[..], &[0x00, 0x00, 0x00, 0x00, 0x05, 0x39]);
        assert_eq!(user_control_event(&payload), Some(UC_CLEAR_STREAM));
    }

    #[test]
    fn test_invoke_payload_roundtrip() {
        let mut status = AmfObject::new();
        status.insert("code", "NetStream.Publish.Start");

        let payload =
            invoke_payload("onStatus", 0.0, &[AmfValue::Null, AmfValue::Object(status)]).unwrap();

        let mut dec = Decoder::new(payload);
        assert_eq!(dec.string().unwrap(), "onStatus");
        assert_eq!(dec.number().unwrap(), 0.0);
        assert_eq!(dec.value().unwrap(), AmfValue::Null);
        let object = dec.object().unwrap();
        assert_eq!(object.get_str("code"), Some("NetStream.Publish.Start"));
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_result_payload_shape() {
        let payload = result_payload(5.0, AmfValue::Null, AmfValue::Number(1337.0)).unwrap();
        let mut dec = Decoder::new(payload);
        assert_eq!(dec.string().unwrap(), "_result");
        assert_eq!(dec.number().unwrap(), 5.0);
        assert_eq!(dec.value().unwrap(), AmfValue::Null);
        assert_eq!(dec.number().unwrap(), 1337.0);
    }

    #[test]
    fn test_notify_payload_shape() {
        let payload = notify_payload(
            "|RtmpSampleAccess",
            &[AmfValue::Boolean(true), AmfValue::Boolean(true)],
        )
        .unwrap();
        let mut dec = Decoder::new(payload);
        assert_eq!(dec.string().unwrap(), "|RtmpSampleAccess");
        assert_eq!(dec.boolean().unwrap(), true);
        assert_eq!(dec.boolean().unwrap(), true);
    }
}
