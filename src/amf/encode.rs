//! AMF0 encoder
//!
//! Replies, status objects, and metadata all go out as AMF0; peers that
//! switched to AMF3 still accept it (the connect reply advertises
//! `objectEncoding: 3.0` but the server never emits AMF3 values).
//!
//! Numbers are written with explicit IEEE-754 big-endian byte order so the
//! output is identical on every platform.

use bytes::{BufMut, Bytes, BytesMut};

use super::decode::{
    AMF0_BOOLEAN, AMF0_ECMA_ARRAY, AMF0_NULL, AMF0_NUMBER, AMF0_OBJECT, AMF0_OBJECT_END,
    AMF0_STRING, AMF0_UNDEFINED,
};
use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

/// AMF0 encoder accumulating into one buffer
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, resetting the encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Current encoded length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been encoded yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single value
    pub fn write(&mut self, value: &AmfValue) -> Result<(), AmfError> {
        match value {
            AmfValue::Number(n) => {
                self.buf.put_u8(AMF0_NUMBER);
                self.buf.put_slice(&n.to_be_bytes());
            }
            AmfValue::Integer(_) => return Err(AmfError::IntegerUnsupported),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(AMF0_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::String(s) => {
                self.buf.put_u8(AMF0_STRING);
                self.write_key(s);
            }
            AmfValue::Object(object) => {
                self.buf.put_u8(AMF0_OBJECT);
                self.write_body(object)?;
            }
            AmfValue::EcmaArray(object) => {
                self.buf.put_u8(AMF0_ECMA_ARRAY);
                // associative count, always zero on this wire dialect
                self.buf.put_u32(0);
                self.write_body(object)?;
            }
            AmfValue::Null => self.buf.put_u8(AMF0_NULL),
            AmfValue::Undefined => self.buf.put_u8(AMF0_UNDEFINED),
        }
        Ok(())
    }

    /// Encode a sequence of values
    pub fn write_all(&mut self, values: &[AmfValue]) -> Result<(), AmfError> {
        for value in values {
            self.write(value)?;
        }
        Ok(())
    }

    /// Key-value pairs in insertion order, then the empty-key sentinel
    fn write_body(&mut self, object: &AmfObject) -> Result<(), AmfError> {
        for (key, value) in object.iter() {
            self.write_key(key);
            self.write(value)?;
        }
        self.write_key("");
        self.buf.put_u8(AMF0_OBJECT_END);
        Ok(())
    }

    /// u16 length + UTF-8 bytes, no type tag
    fn write_key(&mut self, s: &str) {
        let len = s.len().min(u16::MAX as usize);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a sequence of values into a fresh buffer
pub fn encode_all(values: &[AmfValue]) -> Result<Bytes, AmfError> {
    let mut encoder = Encoder::new();
    encoder.write_all(values)?;
    Ok(encoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::Decoder;

    fn roundtrip(value: AmfValue) -> AmfValue {
        let mut encoder = Encoder::new();
        encoder.write(&value).unwrap();
        let mut decoder = Decoder::new(encoder.finish());
        let decoded = decoder.value().unwrap();
        assert_eq!(decoder.remaining(), 0);
        decoded
    }

    #[test]
    fn test_scalar_roundtrips() {
        assert_eq!(roundtrip(AmfValue::Number(42.5)), AmfValue::Number(42.5));
        assert_eq!(
            roundtrip(AmfValue::Boolean(true)),
            AmfValue::Boolean(true)
        );
        assert_eq!(
            roundtrip(AmfValue::String("hello".into())),
            AmfValue::String("hello".into())
        );
        assert_eq!(roundtrip(AmfValue::Null), AmfValue::Null);
        assert_eq!(roundtrip(AmfValue::Undefined), AmfValue::Undefined);
    }

    #[test]
    fn test_number_is_big_endian_on_the_wire() {
        let mut encoder = Encoder::new();
        encoder.write(&AmfValue::Number(1.0)).unwrap();
        let bytes = encoder.finish();
        assert_eq!(
            &bytes[..],
            &[0x00, 0x3f, 0xf0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_object_roundtrip_keeps_order() {
        let mut object = AmfObject::new();
        object.insert("level", "status");
        object.insert("code", "NetConnection.Connect.Success");
        object.insert("objectEncoding", 3.0);

        let decoded = roundtrip(AmfValue::Object(object.clone()));
        assert_eq!(decoded, AmfValue::Object(object));
    }

    #[test]
    fn test_ecma_array_roundtrip() {
        let mut object = AmfObject::new();
        object.insert("duration", 0.0);
        object.insert("width", 640.0);

        let decoded = roundtrip(AmfValue::EcmaArray(object.clone()));
        assert_eq!(decoded, AmfValue::EcmaArray(object));
    }

    #[test]
    fn test_ecma_array_count_field_is_zero() {
        let mut object = AmfObject::new();
        object.insert("width", 640.0);

        let mut encoder = Encoder::new();
        encoder.write(&AmfValue::EcmaArray(object)).unwrap();
        let bytes = encoder.finish();
        assert_eq!(bytes[0], AMF0_ECMA_ARRAY);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_integer_refuses_amf0() {
        let mut encoder = Encoder::new();
        assert!(matches!(
            encoder.write(&AmfValue::Integer(7)),
            Err(AmfError::IntegerUnsupported)
        ));
    }

    #[test]
    fn test_nested_object() {
        let mut inner = AmfObject::new();
        inner.insert("fmsVer", "FMS/4,5,1,484");

        let mut outer = AmfObject::new();
        outer.insert("info", AmfValue::Object(inner));
        outer.insert("ok", true);

        let decoded = roundtrip(AmfValue::Object(outer.clone()));
        assert_eq!(decoded, AmfValue::Object(outer));
    }

    #[test]
    fn test_encode_all_sequence() {
        let values = vec![
            AmfValue::String("_result".into()),
            AmfValue::Number(1.0),
            AmfValue::Null,
        ];
        let bytes = encode_all(&values).unwrap();

        let mut decoder = Decoder::new(bytes);
        assert_eq!(decoder.string().unwrap(), "_result");
        assert_eq!(decoder.number().unwrap(), 1.0);
        assert_eq!(decoder.value().unwrap(), AmfValue::Null);
        assert_eq!(decoder.remaining(), 0);
    }
}
