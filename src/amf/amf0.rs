//! AMF0 encoder and decoder
//!
//! Type markers handled here:
//! ```text
//! 0x00 Number      0x01 Boolean     0x02 String      0x03 Object
//! 0x05 Null        0x06 Undefined   0x07 Reference   0x08 ECMA Array
//! 0x09 Object End  0x0A Strict Arr  0x0B Date        0x0C Long String
//! 0x0D Unsupported 0x0F XML (read as string)         0x10 Typed Object
//! ```
//!
//! Decoding is lenient by default: servers in the wild omit object end
//! markers and send markers a publisher never needs to interpret.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;

const MAX_NESTING_DEPTH: usize = 32;

/// AMF0 decoder
pub struct Amf0Decoder {
    references: Vec<AmfValue>,
    lenient: bool,
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::with_lenient(true)
    }

    pub fn with_lenient(lenient: bool) -> Self {
        Self {
            references: Vec::new(),
            lenient,
            depth: 0,
        }
    }

    /// Decode one value
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if !buf.has_remaining() {
            return Err(AmfError::UnexpectedEof);
        }
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(AmfError::NestingTooDeep);
        }

        self.depth += 1;
        let marker = buf.get_u8();
        let value = self.decode_marker(marker, buf);
        self.depth -= 1;
        value
    }

    /// Decode values until the buffer is exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut out = Vec::new();
        while buf.has_remaining() {
            out.push(self.decode(buf)?);
        }
        Ok(out)
    }

    fn decode_marker(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                need(buf, 8)?;
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                need(buf, 1)?;
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_short_str(buf)?)),
            MARKER_LONG_STRING | MARKER_XML_DOCUMENT => Ok(AmfValue::String(read_long_str(buf)?)),
            MARKER_OBJECT => {
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::Object(props)))
            }
            MARKER_TYPED_OBJECT => {
                // Class name carries no meaning for a publisher
                let _class = read_short_str(buf)?;
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::Object(props)))
            }
            MARKER_ECMA_ARRAY => {
                need(buf, 4)?;
                let _count_hint = buf.get_u32();
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::EcmaArray(props)))
            }
            MARKER_STRICT_ARRAY => {
                need(buf, 4)?;
                let count = buf.get_u32() as usize;
                let slot = self.reserve_reference();
                let mut items = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    items.push(self.decode(buf)?);
                }
                Ok(self.fill_reference(slot, AmfValue::StrictArray(items)))
            }
            MARKER_DATE => {
                need(buf, 10)?;
                let millis = buf.get_f64();
                let _tz = buf.get_i16();
                Ok(AmfValue::Date(millis))
            }
            MARKER_REFERENCE => {
                need(buf, 2)?;
                let index = buf.get_u16();
                self.references
                    .get(index as usize)
                    .cloned()
                    .ok_or(AmfError::InvalidReference(index))
            }
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            other if self.lenient => {
                tracing::debug!(marker = other, "Skipping unknown AMF0 marker");
                Ok(AmfValue::Undefined)
            }
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    fn read_properties(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut props = Vec::new();
        loop {
            if self.lenient && !buf.has_remaining() {
                // Missing end marker at the end of the message
                return Ok(props);
            }
            let key = read_short_str(buf)?;
            if key.is_empty() {
                if buf.has_remaining() && buf.chunk()[0] == MARKER_OBJECT_END {
                    buf.advance(1);
                    return Ok(props);
                }
                if self.lenient {
                    return Ok(props);
                }
                return Err(AmfError::InvalidObjectEnd);
            }
            let value = self.decode(buf)?;
            props.push((key, value));
        }
    }

    fn reserve_reference(&mut self) -> usize {
        self.references.push(AmfValue::Null);
        self.references.len() - 1
    }

    fn fill_reference(&mut self, slot: usize, value: AmfValue) -> AmfValue {
        self.references[slot] = value.clone();
        value
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        Err(AmfError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn read_short_str(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8(buf, len)
}

fn read_long_str(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    read_utf8(buf, len)
}

fn read_utf8(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::String(s) if s.len() > u16::MAX as usize => {
                self.buf.put_u8(MARKER_LONG_STRING);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::String(s) => {
                self.buf.put_u8(MARKER_STRING);
                self.put_key(s);
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.put_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.put_properties(props);
            }
            AmfValue::StrictArray(items) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(items.len() as u32);
                for item in items {
                    self.encode(item);
                }
            }
            AmfValue::Date(millis) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
        }
    }

    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn put_key(&mut self, key: &str) {
        let len = key.len().min(u16::MAX as usize);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&key.as_bytes()[..len]);
    }

    fn put_properties(&mut self, props: &[(String, AmfValue)]) {
        for (key, value) in props {
            self.put_key(key);
            self.encode(value);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a sequence of values into one message body
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Decode every value in a message body
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    Amf0Decoder::new().decode_all(&mut Bytes::copy_from_slice(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_command_roundtrip() {
        let values = vec![
            AmfValue::from("connect"),
            AmfValue::Number(1.0),
            AmfValue::object([
                ("app", AmfValue::from("live")),
                ("type", AmfValue::from("nonprivate")),
                ("tcUrl", AmfValue::from("rtmp://localhost/live")),
                ("fpad", AmfValue::Boolean(false)),
                ("objectEncoding", AmfValue::Number(0.0)),
            ]),
        ];

        let decoded = decode_all(&encode_all(&values)).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(decoded[2].get_str("tcUrl"), Some("rtmp://localhost/live"));
    }

    #[test]
    fn test_metadata_ecma_array() {
        let values = vec![
            AmfValue::from("@setDataFrame"),
            AmfValue::from("onMetaData"),
            AmfValue::ecma_array([("width", 720.0), ("height", 1280.0)]),
        ];
        let encoded = encode_all(&values);

        // ECMA array: marker + u32 count
        let ecma_start = 3 + "@setDataFrame".len() + 3 + "onMetaData".len();
        assert_eq!(encoded[ecma_start], MARKER_ECMA_ARRAY);
        assert_eq!(&encoded[ecma_start + 1..ecma_start + 5], &[0, 0, 0, 2]);

        assert_eq!(decode_all(&encoded).unwrap(), values);
    }

    #[test]
    fn test_long_string_marker() {
        let long = "k".repeat(70_000);
        let encoded = encode_all(&[AmfValue::String(long.clone())]);
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode_all(&encoded).unwrap(), vec![AmfValue::String(long)]);
    }

    #[test]
    fn test_missing_object_end_is_tolerated() {
        // Object with one property, truncated before the end marker
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(4);
        raw.put_slice(b"code");
        raw.put_u8(MARKER_STRING);
        raw.put_u16(2);
        raw.put_slice(b"ok");

        let decoded = decode_all(&raw).unwrap();
        assert_eq!(decoded[0].get_str("code"), Some("ok"));

        let mut strict = Amf0Decoder::with_lenient(false);
        assert_eq!(
            strict.decode(&mut raw.freeze()),
            Err(AmfError::UnexpectedEof)
        );
    }

    #[test]
    fn test_typed_object_reads_as_object() {
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_TYPED_OBJECT);
        raw.put_u16(5);
        raw.put_slice(b"Point");
        raw.put_u16(1);
        raw.put_slice(b"x");
        raw.put_u8(MARKER_NUMBER);
        raw.put_f64(3.0);
        raw.put_u16(0);
        raw.put_u8(MARKER_OBJECT_END);

        let decoded = decode_all(&raw).unwrap();
        assert_eq!(decoded[0].get_number("x"), Some(3.0));
    }

    #[test]
    fn test_reference_resolves_earlier_object() {
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(1);
        raw.put_slice(b"a");
        raw.put_u8(MARKER_BOOLEAN);
        raw.put_u8(1);
        raw.put_u16(0);
        raw.put_u8(MARKER_OBJECT_END);
        raw.put_u8(MARKER_REFERENCE);
        raw.put_u16(0);

        let decoded = decode_all(&raw).unwrap();
        assert_eq!(decoded[0], decoded[1]);

        assert_eq!(
            decode_all(&[MARKER_REFERENCE, 0, 9]),
            Err(AmfError::InvalidReference(9))
        );
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode_all(&[MARKER_NUMBER, 0x40]), Err(AmfError::UnexpectedEof));
        assert_eq!(
            decode_all(&[MARKER_STRING, 0x00, 0x05, b'a']),
            Err(AmfError::UnexpectedEof)
        );
    }

    #[test]
    fn test_unknown_marker_strict_vs_lenient() {
        assert_eq!(decode_all(&[0x42]).unwrap(), vec![AmfValue::Undefined]);

        let mut strict = Amf0Decoder::with_lenient(false);
        assert_eq!(
            strict.decode(&mut Bytes::from_static(&[0x42])),
            Err(AmfError::UnknownMarker(0x42))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut value = AmfValue::object(Vec::<(String, AmfValue)>::new());
        for _ in 0..40 {
            value = AmfValue::object([("inner", value)]);
        }
        let encoded = encode_all(&[value]);
        assert_eq!(decode_all(&encoded), Err(AmfError::NestingTooDeep));
    }

    #[test]
    fn test_encoder_finish_resets() {
        let mut encoder = Amf0Encoder::new();
        assert!(encoder.is_empty());
        encoder.encode(&AmfValue::Null);
        assert_eq!(encoder.len(), 1);
        assert_eq!(&encoder.finish()[..], &[MARKER_NULL]);
        assert!(encoder.is_empty());
    }
}
