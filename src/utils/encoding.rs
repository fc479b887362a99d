//! Byte-level codecs for the postings snapshot.
//!
//! Doc id lists are stored as varint-encoded gaps between ascending ids.
//! Dictionary keys are length-prefixed UTF-8.

use roaring::RoaringBitmap;
use std::io::{self, Read, Write};

/// Append `value` as a LEB128-style varint
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode one varint. Returns `(value, bytes_consumed)`, or `None` when the
/// input is truncated or does not fit in 32 bits.
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;

    for (i, &byte) in buf.iter().enumerate().take(5) {
        let bits = (byte & 0x7f) as u32;
        if i == 4 && bits > 0x0f {
            return None;
        }
        result |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }

    None
}

/// Gap-encode the doc ids of a bitmap (already ascending)
pub fn encode_doc_ids(docs: &RoaringBitmap, buf: &mut Vec<u8>) {
    let mut prev = 0u32;
    for (i, doc) in docs.iter().enumerate() {
        let gap = if i == 0 { doc } else { doc - prev };
        encode_varint(gap, buf);
        prev = doc;
    }
}

/// Inverse of [`encode_doc_ids`]. `None` on a truncated or overflowing list.
pub fn decode_doc_ids(buf: &[u8]) -> Option<RoaringBitmap> {
    let mut docs = RoaringBitmap::new();
    let mut prev = 0u32;
    let mut pos = 0;

    while pos < buf.len() {
        let (gap, consumed) = decode_varint(&buf[pos..])?;
        let doc = if docs.is_empty() { gap } else { prev.checked_add(gap)? };
        docs.insert(doc);
        prev = doc;
        pos += consumed;
    }

    Some(docs)
}

pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Write a u32 length prefix followed by the string bytes
pub fn write_str<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    write_u32_le(writer, s.len() as u32)?;
    writer.write_all(s.as_bytes())
}

pub fn read_str<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = read_u32_le(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_edges() {
        for value in [0, 1, 127, 128, 16383, 16384, u32::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            assert_eq!(decode_varint(&buf), Some((value, buf.len())));
        }
        assert_eq!(decode_varint(&[0x80]), None);
        assert_eq!(decode_varint(&[0xff, 0xff, 0xff, 0xff, 0x7f]), None);
    }

    #[test]
    fn test_doc_ids_keep_zero() {
        let docs: RoaringBitmap = [0u32, 3, 4, 900].into_iter().collect();
        let mut buf = Vec::new();
        encode_doc_ids(&docs, &mut buf);
        assert_eq!(decode_doc_ids(&buf), Some(docs));
    }

    #[test]
    fn test_truncated_doc_ids() {
        assert_eq!(decode_doc_ids(&[0x05, 0x80]), None);
    }

    #[test]
    fn test_str_prefix() {
        let mut buf = Vec::new();
        write_str(&mut buf, "system@410").unwrap();
        assert_eq!(buf.len(), 4 + 10);
        assert_eq!(read_str(&mut Cursor::new(buf)).unwrap(), "system@410");
    }
}
