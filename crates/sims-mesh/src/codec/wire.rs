//! Tag-value record encoding used on the phone channel
//!
//! A minimal subset of the protobuf wire format. Every field starts with a
//! varint key `field_number << 3 | wire_kind`:
//!
//! | Kind | Value | Body |
//! |------|-------|------|
//! | Varint | 0 | 7 bits per byte, MSB continuation |
//! | Fixed64 | 1 | 8 bytes little-endian (decode only) |
//! | LengthDelimited | 2 | varint length + bytes |
//! | Fixed32 | 5 | 4 bytes little-endian |
//!
//! Writers work over a bounded buffer and never leave a partial field
//! behind. Readers are forward scans bounded by the input length.

use bytes::{BufMut, Bytes, BytesMut};
use sims_core::{MeshError, Result};
use tracing::trace;

/// Default bound for encoded records (one outbox blob)
pub const DEFAULT_RECORD_LIMIT: usize = 256;

/// Longest varint encoding of a u64
const MAX_VARINT_LEN: usize = 10;

/// Wire kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    /// Variable-length integer
    Varint,
    /// Eight little-endian bytes
    Fixed64,
    /// Length-prefixed bytes (strings, nested records)
    LengthDelimited,
    /// Four little-endian bytes
    Fixed32,
}

impl WireKind {
    /// Numeric kind as carried in the key
    pub fn value(&self) -> u8 {
        match self {
            WireKind::Varint => 0,
            WireKind::Fixed64 => 1,
            WireKind::LengthDelimited => 2,
            WireKind::Fixed32 => 5,
        }
    }

    /// Parse a key's kind bits; groups and reserved kinds are unknown
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(WireKind::Varint),
            1 => Some(WireKind::Fixed64),
            2 => Some(WireKind::LengthDelimited),
            5 => Some(WireKind::Fixed32),
            _ => None,
        }
    }
}

/// Number of bytes `value` takes as a varint
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn key(field: u32, kind: WireKind) -> u64 {
    ((field as u64) << 3) | kind.value() as u64
}

/// Read a varint from the front of `data`; `None` if truncated or overlong
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Bounded writer for tag-value records
#[derive(Debug)]
pub struct TagWriter {
    buf: BytesMut,
    limit: usize,
}

impl TagWriter {
    /// Writer bounded at [`DEFAULT_RECORD_LIMIT`] bytes
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_RECORD_LIMIT)
    }

    /// Writer bounded at `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    fn reserve_field(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(MeshError::BufferOverflow {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Write a varint field
    pub fn write_varint(&mut self, field: u32, value: u64) -> Result<()> {
        let k = key(field, WireKind::Varint);
        self.reserve_field(varint_len(k) + varint_len(value))?;
        put_varint(&mut self.buf, k);
        put_varint(&mut self.buf, value);
        Ok(())
    }

    /// Write a four-byte little-endian field
    pub fn write_fixed32(&mut self, field: u32, value: u32) -> Result<()> {
        let k = key(field, WireKind::Fixed32);
        self.reserve_field(varint_len(k) + 4)?;
        put_varint(&mut self.buf, k);
        self.buf.put_u32_le(value);
        Ok(())
    }

    /// Write a length-delimited field
    pub fn write_length_delimited(&mut self, field: u32, data: &[u8]) -> Result<()> {
        let k = key(field, WireKind::LengthDelimited);
        let len = data.len() as u64;
        self.reserve_field(varint_len(k) + varint_len(len) + data.len())?;
        put_varint(&mut self.buf, k);
        put_varint(&mut self.buf, len);
        self.buf.put_slice(data);
        Ok(())
    }

    /// Write a UTF-8 string field
    pub fn write_str(&mut self, field: u32, value: &str) -> Result<()> {
        self.write_length_delimited(field, value.as_bytes())
    }

    /// Write a nested record built by another writer
    pub fn write_message(&mut self, field: u32, nested: TagWriter) -> Result<()> {
        self.write_length_delimited(field, &nested.buf)
    }

    /// Finish and take the encoded record
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for TagWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of a decoded field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Varint value
    Varint(u64),
    /// Fixed64 value
    Fixed64(u64),
    /// Length-delimited body
    Bytes(&'a [u8]),
    /// Fixed32 value
    Fixed32(u32),
}

/// Forward scan over the fields of a record
///
/// Stops at the end of input, at a truncated field, or at an unknown wire
/// kind. Each step consumes at least one byte, so the scan terminates on any
/// input.
#[derive(Debug, Clone)]
pub struct FieldIter<'a> {
    data: &'a [u8],
    pos: usize,
    aborted: bool,
}

impl<'a> FieldIter<'a> {
    /// Scan `data` from the start
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            aborted: false,
        }
    }

    /// Whether the scan ended early on a malformed or unknown field
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    fn stop(&mut self) -> Option<(u32, FieldValue<'a>)> {
        self.pos = self.data.len();
        self.aborted = true;
        None
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = (u32, FieldValue<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.pos..];
        let Some((k, key_len)) = read_varint(rest) else {
            trace!(pos = self.pos, "Truncated key, ending scan");
            return self.stop();
        };
        let field = (k >> 3) as u32;
        let Some(kind) = WireKind::from_value((k & 0x7) as u8) else {
            trace!(pos = self.pos, kind = k & 0x7, "Unknown wire kind, ending scan");
            return self.stop();
        };
        let body = &rest[key_len..];

        let (value, body_len) = match kind {
            WireKind::Varint => match read_varint(body) {
                Some((v, n)) => (FieldValue::Varint(v), n),
                None => return self.stop(),
            },
            WireKind::Fixed64 => {
                let Some(bytes) = body.get(..8) else {
                    return self.stop();
                };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                (FieldValue::Fixed64(u64::from_le_bytes(raw)), 8)
            }
            WireKind::Fixed32 => {
                let Some(bytes) = body.get(..4) else {
                    return self.stop();
                };
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                (FieldValue::Fixed32(u32::from_le_bytes(raw)), 4)
            }
            WireKind::LengthDelimited => {
                let Some((len, n)) = read_varint(body) else {
                    return self.stop();
                };
                let Some(end) = usize::try_from(len).ok().and_then(|l| n.checked_add(l)) else {
                    return self.stop();
                };
                let Some(slice) = body.get(n..end) else {
                    return self.stop();
                };
                (FieldValue::Bytes(slice), end)
            }
        };

        self.pos += key_len + body_len;
        Some((field, value))
    }
}

/// First varint value of `field`, skipping other fields
pub fn extract_varint(data: &[u8], field: u32) -> Option<i64> {
    FieldIter::new(data).find_map(|(number, value)| match value {
        FieldValue::Varint(v) if number == field => Some(v as i64),
        _ => None,
    })
}

/// First length-delimited body of `field`, skipping other fields
pub fn extract_length_delimited(data: &[u8], field: u32) -> Option<&[u8]> {
    FieldIter::new(data).find_map(|(number, value)| match value {
        FieldValue::Bytes(b) if number == field => Some(b),
        _ => None,
    })
}

/// First fixed32 value of `field`
pub fn extract_fixed32(data: &[u8], field: u32) -> Option<u32> {
    FieldIter::new(data).find_map(|(number, value)| match value {
        FieldValue::Fixed32(v) if number == field => Some(v),
        _ => None,
    })
}

/// First string value of `field`, if it is valid UTF-8
pub fn extract_str(data: &[u8], field: u32) -> Option<&str> {
    extract_length_delimited(data, field).and_then(|b| std::str::from_utf8(b).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_encoding() {
        let mut w = TagWriter::new();
        w.write_varint(1, 300).unwrap();
        assert_eq!(&w.finish()[..], &[0x08, 0xAC, 0x02]);

        let mut w = TagWriter::new();
        w.write_varint(8, 42).unwrap();
        assert_eq!(&w.finish()[..], &[0x40, 0x2A]);
    }

    #[test]
    fn test_varint_len() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(u64::MAX), 10);
    }

    #[test]
    fn test_length_delimited_and_fixed32() {
        let mut w = TagWriter::new();
        w.write_str(2, "hi").unwrap();
        w.write_fixed32(4, 0x0403_0201).unwrap();
        let bytes = w.finish();
        assert_eq!(&bytes[..], &[0x12, 0x02, b'h', b'i', 0x25, 1, 2, 3, 4]);

        assert_eq!(extract_str(&bytes, 2), Some("hi"));
        assert_eq!(extract_fixed32(&bytes, 4), Some(0x0403_0201));
    }

    #[test]
    fn test_overflow_writes_nothing() {
        let mut w = TagWriter::with_limit(4);
        w.write_varint(1, 1).unwrap();
        let err = w.write_length_delimited(2, b"abc").unwrap_err();
        assert!(matches!(
            err,
            MeshError::BufferOverflow {
                needed: 5,
                available: 2
            }
        ));
        assert_eq!(w.len(), 2);
        assert!(w.write_varint(3, u64::MAX).is_err());
        assert!(w.write_fixed32(3, 1).is_err());
        assert_eq!(&w.finish()[..], &[0x08, 0x01]);
    }

    #[test]
    fn test_nested_message() {
        let mut inner = TagWriter::new();
        inner.write_str(1, "!00000001").unwrap();
        let mut outer = TagWriter::new();
        outer.write_varint(1, 1).unwrap();
        outer.write_message(2, inner).unwrap();
        let bytes = outer.finish();

        let user = extract_length_delimited(&bytes, 2).unwrap();
        assert_eq!(extract_str(user, 1), Some("!00000001"));
    }

    #[test]
    fn test_extract_skips_unknown_fields() {
        let mut w = TagWriter::new();
        w.write_fixed32(3, 7).unwrap();
        w.write_str(5, "skip").unwrap();
        w.write_varint(8, 99).unwrap();
        let bytes = w.finish();
        assert_eq!(extract_varint(&bytes, 8), Some(99));
        assert_eq!(extract_varint(&bytes, 9), None);
        assert_eq!(extract_length_delimited(&bytes, 1), None);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let mut w = TagWriter::new();
        w.write_varint(1, 1).unwrap();
        w.write_varint(1, 2).unwrap();
        let bytes = w.finish();
        assert_eq!(extract_varint(&bytes, 1), Some(1));
        let all: Vec<_> = FieldIter::new(&bytes).collect();
        assert_eq!(all.last(), Some(&(1, FieldValue::Varint(2))));
    }

    #[test]
    fn test_fixed64_decoded() {
        let mut data = vec![0x09];
        data.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        data.extend_from_slice(&[0x10, 0x05]);
        let fields: Vec<_> = FieldIter::new(&data).collect();
        assert_eq!(
            fields,
            vec![
                (1, FieldValue::Fixed64(0x1122_3344_5566_7788)),
                (2, FieldValue::Varint(5))
            ]
        );
    }

    #[test]
    fn test_truncated_varint_aborts() {
        // key for field 1 varint, then a continuation byte with nothing after
        assert_eq!(extract_varint(&[0x08, 0x80], 1), None);
        assert_eq!(FieldIter::new(&[0x80]).count(), 0);
    }

    #[test]
    fn test_truncated_length_delimited_aborts() {
        assert_eq!(extract_length_delimited(&[0x0A, 0x05, b'a'], 1), None);
        // absurd length must not overflow
        let data = [0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(extract_length_delimited(&data, 1), None);
    }

    #[test]
    fn test_unknown_wire_kind_ends_scan() {
        // field 1 kind 3 (start group) followed by a valid varint field
        let data = [0x0B, 0x10, 0x01];
        assert_eq!(extract_varint(&data, 2), None);

        let mut iter = FieldIter::new(&data);
        assert!(iter.next().is_none());
        assert!(iter.is_aborted());
    }

    #[test]
    fn test_clean_scan_not_aborted() {
        let mut iter = FieldIter::new(&[0x08, 0x01]);
        assert_eq!(iter.next(), Some((1, FieldValue::Varint(1))));
        assert!(iter.next().is_none());
        assert!(!iter.is_aborted());
    }

    #[test]
    fn test_garbage_terminates() {
        let garbage: Vec<u8> = (0..=255u8).cycle().take(2048).collect();
        let count = FieldIter::new(&garbage).count();
        assert!(count <= garbage.len());
    }
}
