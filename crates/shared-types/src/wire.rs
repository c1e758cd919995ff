//! # Wire Codec
//!
//! Tag-length-value encoding used by every persisted or exchanged ledger
//! message. Integer fields are LEB128 varints, embedded messages are
//! length-prefixed. Field numbers are part of the persisted format and must
//! never be renumbered.
//!
//! A field set to its default (zero / empty) is omitted on encode and
//! restored as the default on decode, so `decode(encode(x)) == x` holds for
//! every message type built on this module.

use thiserror::Error;

/// Maximum encoded size of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

const WIRE_VARINT: u64 = 0;
const WIRE_BYTES: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("truncated varint")]
    TruncatedVarint,

    #[error("truncated field: need {need} bytes, {have} remain")]
    TruncatedField { need: usize, have: usize },

    #[error("unsupported wire type {wire_type} for field {field}")]
    UnsupportedWireType { field: u32, wire_type: u64 },

    #[error("field {field}: {message}")]
    InvalidField { field: u32, message: String },

    #[error("unknown format version {0}")]
    UnknownVersion(u64),
}

/// Compute the number of bytes needed to encode `value` as a varint.
pub const fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append a LEB128 varint to `buf`.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Read a varint from `buf`, returning `(value, bytes_consumed)`.
///
/// The high bit of each byte indicates whether more bytes follow; at most
/// ten bytes are consumed for a u64.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize), WireError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(WireError::TruncatedVarint)
}

/// Serializer for a single message. Fields must be appended in ascending
/// field-number order to keep encodings canonical.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unsigned integer field. Zero is omitted.
    pub fn uint(&mut self, field: u32, value: u64) {
        if value == 0 {
            return;
        }
        write_varint(&mut self.buf, (u64::from(field) << 3) | WIRE_VARINT);
        write_varint(&mut self.buf, value);
    }

    /// Append a boolean field. `false` is omitted.
    pub fn boolean(&mut self, field: u32, value: bool) {
        self.uint(field, u64::from(value));
    }

    /// Append a byte-string field. Empty strings are omitted.
    pub fn bytes(&mut self, field: u32, value: &[u8]) {
        if value.is_empty() {
            return;
        }
        write_varint(&mut self.buf, (u64::from(field) << 3) | WIRE_BYTES);
        write_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// Append an embedded message field, even when its encoding is empty.
    ///
    /// Presence of the field is meaningful for embedded messages (an absent
    /// optional message is not the same as a present default one), so this
    /// does not share the empty-elision of [`WireWriter::bytes`].
    pub fn message(&mut self, field: u32, body: &WireWriter) {
        write_varint(&mut self.buf, (u64::from(field) << 3) | WIRE_BYTES);
        write_varint(&mut self.buf, body.buf.len() as u64);
        self.buf.extend_from_slice(&body.buf);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// A decoded field value borrowed from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Uint(u64),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    pub fn as_uint(&self, field: u32) -> Result<u64, WireError> {
        match self {
            FieldValue::Uint(v) => Ok(*v),
            FieldValue::Bytes(_) => Err(WireError::InvalidField {
                field,
                message: "expected varint, found bytes".into(),
            }),
        }
    }

    pub fn as_bytes(&self, field: u32) -> Result<&'a [u8], WireError> {
        match self {
            FieldValue::Bytes(b) => Ok(b),
            FieldValue::Uint(_) => Err(WireError::InvalidField {
                field,
                message: "expected bytes, found varint".into(),
            }),
        }
    }

    pub fn as_bool(&self, field: u32) -> Result<bool, WireError> {
        Ok(self.as_uint(field)? != 0)
    }
}

/// Streaming decoder over one message. Unknown fields of a known wire type
/// are skipped so older readers tolerate newer writers.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Decode the next `(field_number, value)` pair, or `None` at the end.
    pub fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>, WireError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let (tag, n) = read_varint(&self.buf[self.pos..])?;
        self.pos += n;
        let field = (tag >> 3) as u32;
        match tag & 0x7 {
            WIRE_VARINT => {
                let (value, n) = read_varint(&self.buf[self.pos..])?;
                self.pos += n;
                Ok(Some((field, FieldValue::Uint(value))))
            }
            WIRE_BYTES => {
                let (len, n) = read_varint(&self.buf[self.pos..])?;
                self.pos += n;
                let len = len as usize;
                let have = self.buf.len() - self.pos;
                if len > have {
                    return Err(WireError::TruncatedField { need: len, have });
                }
                let body = &self.buf[self.pos..self.pos + len];
                self.pos += len;
                Ok(Some((field, FieldValue::Bytes(body))))
            }
            wire_type => Err(WireError::UnsupportedWireType { field, wire_type }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value));
            let (decoded, consumed) = read_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_varint_truncated() {
        // Continuation bit set but no following byte.
        assert_eq!(read_varint(&[0x80]), Err(WireError::TruncatedVarint));
    }

    #[test]
    fn test_uint_field_roundtrip() {
        let mut w = WireWriter::new();
        w.uint(1, 42);
        w.uint(2, 0); // elided
        w.uint(3, 7);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!((f, v.as_uint(f).unwrap()), (1, 42));
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!((f, v.as_uint(f).unwrap()), (3, 7));
        assert!(r.next_field().unwrap().is_none());
    }

    #[test]
    fn test_bytes_field_roundtrip() {
        let mut w = WireWriter::new();
        w.bytes(4, b"abc");
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!(f, 4);
        assert_eq!(v.as_bytes(f).unwrap(), b"abc");
    }

    #[test]
    fn test_empty_message_field_is_present() {
        let mut w = WireWriter::new();
        w.message(2, &WireWriter::new());
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!(f, 2);
        assert_eq!(v.as_bytes(f).unwrap(), b"");
    }

    #[test]
    fn test_truncated_bytes_field() {
        let mut w = WireWriter::new();
        w.bytes(1, b"abcdef");
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 2);

        let mut r = WireReader::new(&bytes);
        assert!(matches!(
            r.next_field(),
            Err(WireError::TruncatedField { need: 6, have: 4 })
        ));
    }

    #[test]
    fn test_wrong_value_shape_rejected() {
        let mut w = WireWriter::new();
        w.uint(1, 9);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let (f, v) = r.next_field().unwrap().unwrap();
        assert!(v.as_bytes(f).is_err());
    }
}
