//! Versioned AMF decoder
//!
//! Decoding starts in AMF0. A `0x11` byte in place of an AMF0 type tag is
//! the in-band switch to AMF3; once flipped, the decoder stays in AMF3 for
//! the rest of its life. Every message is decoded with a fresh decoder, so
//! the switch never leaks across messages.
//!
//! AMF3 quirks carried over from the wire dialect this relay speaks:
//! - string lengths arrive as `(len << 1) | 1`; the reference bit is not
//!   honored, the field is simply halved and every string treated as inline
//! - objects and ECMA arrays use the AMF0-shaped body (u16-length keys,
//!   empty-key + 0x09 terminator) in both versions
//! - the ECMA associative-count field is read and ignored

use bytes::{Buf, Bytes};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

// AMF0 type tags
pub(crate) const AMF0_NUMBER: u8 = 0x00;
pub(crate) const AMF0_BOOLEAN: u8 = 0x01;
pub(crate) const AMF0_STRING: u8 = 0x02;
pub(crate) const AMF0_OBJECT: u8 = 0x03;
pub(crate) const AMF0_NULL: u8 = 0x05;
pub(crate) const AMF0_UNDEFINED: u8 = 0x06;
pub(crate) const AMF0_ECMA_ARRAY: u8 = 0x08;
pub(crate) const AMF0_OBJECT_END: u8 = 0x09;
pub(crate) const AMF0_SWITCH_AMF3: u8 = 0x11;

// AMF3 type tags
const AMF3_UNDEFINED: u8 = 0x00;
const AMF3_NULL: u8 = 0x01;
const AMF3_FALSE: u8 = 0x02;
const AMF3_TRUE: u8 = 0x03;
const AMF3_INTEGER: u8 = 0x04;
const AMF3_NUMBER: u8 = 0x05;
const AMF3_STRING: u8 = 0x06;
const AMF3_ARRAY: u8 = 0x09;
const AMF3_OBJECT: u8 = 0x0A;

/// Incremental AMF decoder over one message payload
pub struct Decoder {
    buf: Bytes,
    version: u8,
}

impl Decoder {
    /// Create a decoder positioned at the start of a payload, in AMF0 mode
    pub fn new(payload: Bytes) -> Self {
        Self {
            buf: payload,
            version: 0,
        }
    }

    /// Bytes left after the last decoded value
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Current AMF version (0 until the switch byte has been seen)
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Read the next value's type tag, honoring the AMF3 switch byte
    fn tag(&mut self) -> Result<u8, AmfError> {
        if self.version == 0 && self.buf.first() == Some(&AMF0_SWITCH_AMF3) {
            tracing::debug!("entering AMF3 mode");
            self.buf.advance(1);
            self.version = 3;
        }
        if self.buf.is_empty() {
            return Err(AmfError::ShortBuffer);
        }
        Ok(self.buf.get_u8())
    }

    /// Decode any supported value
    pub fn value(&mut self) -> Result<AmfValue, AmfError> {
        let tag = self.tag()?;
        if self.version == 3 {
            self.amf3_value(tag)
        } else {
            self.amf0_value(tag)
        }
    }

    fn amf0_value(&mut self, tag: u8) -> Result<AmfValue, AmfError> {
        match tag {
            AMF0_NUMBER => Ok(AmfValue::Number(self.f64()?)),
            AMF0_BOOLEAN => Ok(AmfValue::Boolean(self.u8()? != 0)),
            AMF0_STRING => {
                let len = self.u16()? as usize;
                Ok(AmfValue::String(self.utf8(len)?))
            }
            AMF0_OBJECT => Ok(AmfValue::Object(self.object_body()?)),
            AMF0_NULL => Ok(AmfValue::Null),
            AMF0_UNDEFINED => Ok(AmfValue::Undefined),
            AMF0_ECMA_ARRAY => {
                self.u32()?; // associative count, ignored
                Ok(AmfValue::EcmaArray(self.object_body()?))
            }
            other => Err(AmfError::UnknownType(other)),
        }
    }

    fn amf3_value(&mut self, tag: u8) -> Result<AmfValue, AmfError> {
        match tag {
            AMF3_UNDEFINED => Ok(AmfValue::Undefined),
            AMF3_NULL => Ok(AmfValue::Null),
            AMF3_FALSE => Ok(AmfValue::Boolean(false)),
            AMF3_TRUE => Ok(AmfValue::Boolean(true)),
            AMF3_INTEGER => Ok(AmfValue::Integer(self.u29()? as i32)),
            AMF3_NUMBER => Ok(AmfValue::Number(self.f64()?)),
            AMF3_STRING => {
                let len = (self.u29()? / 2) as usize;
                Ok(AmfValue::String(self.utf8(len)?))
            }
            AMF3_ARRAY => {
                self.u32()?; // associative count, ignored
                Ok(AmfValue::EcmaArray(self.object_body()?))
            }
            AMF3_OBJECT => Ok(AmfValue::Object(self.object_body()?)),
            other => Err(AmfError::UnknownType(other)),
        }
    }

    /// Decode a value that must be a string
    pub fn string(&mut self) -> Result<String, AmfError> {
        let tag = self.tag()?;
        let len = if self.version == 3 {
            self.expect(tag, AMF3_STRING)?;
            (self.u29()? / 2) as usize
        } else {
            self.expect(tag, AMF0_STRING)?;
            self.u16()? as usize
        };
        self.utf8(len)
    }

    /// Decode a value that must be a number
    pub fn number(&mut self) -> Result<f64, AmfError> {
        let tag = self.tag()?;
        if self.version == 3 {
            self.expect(tag, AMF3_NUMBER)?;
        } else {
            self.expect(tag, AMF0_NUMBER)?;
        }
        self.f64()
    }

    /// Decode a value that must be a boolean
    pub fn boolean(&mut self) -> Result<bool, AmfError> {
        let tag = self.tag()?;
        if self.version == 3 {
            match tag {
                AMF3_TRUE => Ok(true),
                AMF3_FALSE => Ok(false),
                other => Err(AmfError::TypeMismatch {
                    expected: AMF3_TRUE,
                    found: other,
                }),
            }
        } else {
            self.expect(tag, AMF0_BOOLEAN)?;
            Ok(self.u8()? != 0)
        }
    }

    /// Decode a value that must be an object
    pub fn object(&mut self) -> Result<AmfObject, AmfError> {
        let tag = self.tag()?;
        if self.version == 3 {
            self.expect(tag, AMF3_OBJECT)?;
        } else {
            self.expect(tag, AMF0_OBJECT)?;
        }
        self.object_body()
    }

    /// Decode a value that must be an ECMA array
    pub fn ecma_array(&mut self) -> Result<AmfObject, AmfError> {
        let tag = self.tag()?;
        if self.version == 3 {
            self.expect(tag, AMF3_ARRAY)?;
        } else {
            self.expect(tag, AMF0_ECMA_ARRAY)?;
        }
        self.u32()?; // associative count, ignored
        self.object_body()
    }

    /// Key-value pairs until an empty key, then the object-end byte
    fn object_body(&mut self) -> Result<AmfObject, AmfError> {
        let mut object = AmfObject::new();
        loop {
            let key = self.key()?;
            if key.is_empty() {
                break;
            }
            let value = self.value()?;
            object.insert(key, value);
        }
        let end = self.u8()?;
        if end != AMF0_OBJECT_END {
            return Err(AmfError::TypeMismatch {
                expected: AMF0_OBJECT_END,
                found: end,
            });
        }
        Ok(object)
    }

    /// Object key: u16 length + UTF-8, no type tag
    fn key(&mut self) -> Result<String, AmfError> {
        let len = self.u16()? as usize;
        self.utf8(len)
    }

    /// AMF3 variable-length unsigned integer, 29-bit domain
    ///
    /// The high bit of the first three bytes signals continuation and each
    /// contributes 7 bits; a fourth byte contributes all 8.
    fn u29(&mut self) -> Result<u32, AmfError> {
        let mut value: u32 = 0;
        for i in 0..4 {
            let byte = self.u8()?;
            if i == 3 {
                value = (value << 8) | u32::from(byte);
                break;
            }
            value = (value << 7) | u32::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    fn expect(&self, found: u8, expected: u8) -> Result<(), AmfError> {
        if found == expected {
            Ok(())
        } else {
            Err(AmfError::TypeMismatch { expected, found })
        }
    }

    fn u8(&mut self) -> Result<u8, AmfError> {
        if self.buf.is_empty() {
            return Err(AmfError::ShortBuffer);
        }
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, AmfError> {
        if self.buf.len() < 2 {
            return Err(AmfError::ShortBuffer);
        }
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, AmfError> {
        if self.buf.len() < 4 {
            return Err(AmfError::ShortBuffer);
        }
        Ok(self.buf.get_u32())
    }

    fn f64(&mut self) -> Result<f64, AmfError> {
        if self.buf.len() < 8 {
            return Err(AmfError::ShortBuffer);
        }
        Ok(self.buf.get_f64())
    }

    fn utf8(&mut self, len: usize) -> Result<String, AmfError> {
        if self.buf.len() < len {
            return Err(AmfError::ShortBuffer);
        }
        let bytes = self.buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn amf0_string(s: &str) -> Vec<u8> {
        let mut out = vec![AMF0_STRING];
        out.put_u16(s.len() as u16);
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn test_decode_amf0_scalars() {
        let mut buf = BytesMut::new();
        buf.put_u8(AMF0_NUMBER);
        buf.put_f64(12.5);
        buf.put_u8(AMF0_BOOLEAN);
        buf.put_u8(1);
        buf.put_u8(AMF0_NULL);
        buf.put_u8(AMF0_UNDEFINED);

        let mut dec = Decoder::new(buf.freeze());
        assert_eq!(dec.value().unwrap(), AmfValue::Number(12.5));
        assert_eq!(dec.value().unwrap(), AmfValue::Boolean(true));
        assert_eq!(dec.value().unwrap(), AmfValue::Null);
        assert_eq!(dec.value().unwrap(), AmfValue::Undefined);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_decode_amf0_object_stops_at_sentinel() {
        let mut buf = BytesMut::new();
        buf.put_u8(AMF0_OBJECT);
        buf.put_u16(3);
        buf.put_slice(b"app");
        buf.put_slice(&amf0_string("live"));
        buf.put_u16(0);
        buf.put_u8(AMF0_OBJECT_END);
        // trailing value must be left for the caller
        buf.put_u8(AMF0_NULL);

        let mut dec = Decoder::new(buf.freeze());
        let object = dec.object().unwrap();
        assert_eq!(object.get_str("app"), Some("live"));
        assert_eq!(dec.remaining(), 1);
        assert_eq!(dec.value().unwrap(), AmfValue::Null);
    }

    #[test]
    fn test_decode_ecma_array_ignores_count() {
        let mut buf = BytesMut::new();
        buf.put_u8(AMF0_ECMA_ARRAY);
        buf.put_u32(99); // bogus associative count
        buf.put_u16(8);
        buf.put_slice(b"duration");
        buf.put_u8(AMF0_NUMBER);
        buf.put_f64(0.0);
        buf.put_u16(0);
        buf.put_u8(AMF0_OBJECT_END);

        let mut dec = Decoder::new(buf.freeze());
        let array = dec.ecma_array().unwrap();
        assert_eq!(array.get_number("duration"), Some(0.0));
    }

    #[test]
    fn test_amf3_switch_is_sticky() {
        // 0x11 switch, then an AMF3 string and an AMF3 double
        let mut buf = BytesMut::new();
        buf.put_u8(AMF0_SWITCH_AMF3);
        buf.put_u8(AMF3_STRING);
        buf.put_u8((4 << 1) | 1); // "ping", inline, reference bit set
        buf.put_slice(b"ping");
        buf.put_u8(AMF3_NUMBER);
        buf.put_f64(2.0);

        let mut dec = Decoder::new(buf.freeze());
        assert_eq!(dec.version(), 0);
        assert_eq!(dec.string().unwrap(), "ping");
        assert_eq!(dec.version(), 3);
        assert_eq!(dec.number().unwrap(), 2.0);
    }

    #[test]
    fn test_amf3_booleans_and_null() {
        let mut buf = BytesMut::new();
        buf.put_u8(AMF0_SWITCH_AMF3);
        buf.put_u8(AMF3_TRUE);
        buf.put_u8(AMF3_FALSE);
        buf.put_u8(AMF3_NULL);
        buf.put_u8(AMF3_UNDEFINED);

        let mut dec = Decoder::new(buf.freeze());
        assert_eq!(dec.value().unwrap(), AmfValue::Boolean(true));
        assert_eq!(dec.value().unwrap(), AmfValue::Boolean(false));
        assert_eq!(dec.value().unwrap(), AmfValue::Null);
        assert_eq!(dec.value().unwrap(), AmfValue::Undefined);
    }

    #[test]
    fn test_u29_forms() {
        // one byte: 0x7f
        let mut dec = Decoder::new(Bytes::from_static(&[0x11, 0x04, 0x7f]));
        assert_eq!(dec.value().unwrap(), AmfValue::Integer(0x7f));

        // two bytes: 0x80 0x01 -> (0 << 7) | ... continuation form of 1
        let mut dec = Decoder::new(Bytes::from_static(&[0x11, 0x04, 0x81, 0x01]));
        assert_eq!(dec.value().unwrap(), AmfValue::Integer(0x81));

        // four bytes contribute 7+7+7+8 bits
        let mut dec = Decoder::new(Bytes::from_static(&[0x11, 0x04, 0xff, 0xff, 0xff, 0xff]));
        assert_eq!(dec.value().unwrap(), AmfValue::Integer(0x1fff_ffff));
    }

    #[test]
    fn test_short_buffer_mid_value() {
        let mut buf = BytesMut::new();
        buf.put_u8(AMF0_NUMBER);
        buf.put_u32(7); // only 4 of 8 double bytes

        let mut dec = Decoder::new(buf.freeze());
        assert!(matches!(dec.value(), Err(AmfError::ShortBuffer)));
    }

    #[test]
    fn test_type_mismatch_reports_tags() {
        let mut dec = Decoder::new(Bytes::from_static(&[AMF0_NULL]));
        match dec.string() {
            Err(AmfError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, AMF0_STRING);
                assert_eq!(found, AMF0_NULL);
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x0b]));
        assert!(matches!(dec.value(), Err(AmfError::UnknownType(0x0b))));
    }
}
