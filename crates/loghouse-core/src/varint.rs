//! Variable-length Integer Encoding (Varint)
//!
//! This module provides variable-length encoding for the integers a chunk
//! stores per entry and per block:
//!
//! ## Varint Encoding
//! Instead of always using 8 bytes for a u64, varints use only as many bytes
//! as needed. Each byte carries 7 bits of payload and 1 continuation bit, so
//! values 0-127 fit in one byte and anything fits in at most 10.
//!
//! ## ZigZag Encoding (for signed integers)
//! Maps signed integers to unsigned so small negative numbers stay small:
//! 0 → 0, -1 → 1, 1 → 2, -2 → 3, 2 → 4, etc.
//!
//! ## Why This Matters for Loghouse
//! Timestamps, line lengths, block offsets and symbol indices are all
//! varint-encoded. Entry timestamps cluster tightly within a block and most
//! lines are short, so the per-entry framing is usually 2-4 bytes.
//!
//! ## Decoding Flavors
//! - `decode_varint` / `decode_uvarint` consume from a cursor and fail on
//!   truncated or overlong input; used when a whole section is in memory.
//! - `try_decode_varint` / `try_decode_uvarint` parse a prefix of a byte
//!   slice and report the width consumed, returning `None` while the buffered
//!   bytes are still too short; the streaming block decoder retries these
//!   against a growing read buffer.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Maximum encoded width of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a signed integer as a varint (ZigZag encoding)
pub fn encode_varint(buf: &mut impl BufMut, value: i64) {
    // ZigZag encoding: maps signed integers to unsigned
    // 0 => 0, -1 => 1, 1 => 2, -2 => 3, 2 => 4, etc.
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;

    encode_uvarint(buf, unsigned);
}

/// Encode an unsigned integer as a varint
pub fn encode_uvarint(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Encoded width of a signed varint, in bytes.
pub fn varint_len(value: i64) -> usize {
    uvarint_len(((value << 1) ^ (value >> 63)) as u64)
}

/// Encoded width of an unsigned varint, in bytes.
pub fn uvarint_len(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

/// Decode a signed varint from a cursor, failing on truncated input.
pub fn decode_varint(buf: &mut impl Buf) -> Result<i64> {
    let unsigned = decode_uvarint(buf)?;
    Ok(zigzag_decode(unsigned))
}

/// Decode an unsigned varint from a cursor, failing on truncated input.
pub fn decode_uvarint(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::InvalidData("truncated varint".to_string()));
        }

        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(Error::InvalidData("varint overflows 64 bits".to_string()));
        }
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift >= 64 {
            return Err(Error::InvalidData("varint overflows 64 bits".to_string()));
        }
    }
}

/// Try to decode a signed varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// buffered bytes do not yet hold a complete (and valid) varint.
pub fn try_decode_varint(buf: &[u8]) -> Option<(i64, usize)> {
    try_decode_uvarint(buf).map(|(u, w)| (zigzag_decode(u), w))
}

/// Try to decode an unsigned varint from the front of `buf`.
pub fn try_decode_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift == 63 && byte > 1 {
            return None; // overflow reads the same as incomplete: no progress
        }
        value |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }

        shift += 7;
        if shift >= 64 {
            return None;
        }
    }

    None
}

fn zigzag_decode(unsigned: u64) -> i64 {
    let value = (unsigned >> 1) as i64;
    if (unsigned & 1) != 0 {
        !value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(value: i64) -> i64 {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, value);
        let mut cursor = buf.as_ref();
        decode_varint(&mut cursor).unwrap()
    }

    #[test]
    fn test_varint_small_positive() {
        assert_eq!(roundtrip(5), 5);
    }

    #[test]
    fn test_varint_small_negative() {
        assert_eq!(roundtrip(-5), -5);
    }

    #[test]
    fn test_varint_zero() {
        assert_eq!(roundtrip(0), 0);
    }

    #[test]
    fn test_varint_large() {
        assert_eq!(roundtrip(1_000_000), 1_000_000);
        assert_eq!(roundtrip(-1_000_000), -1_000_000);
        assert_eq!(roundtrip(i64::MAX), i64::MAX);
        assert_eq!(roundtrip(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_uvarint_roundtrip() {
        for value in [0u64, 1, 127, 128, 12345, u64::MAX] {
            let mut buf = BytesMut::new();
            encode_uvarint(&mut buf, value);
            let mut cursor = buf.as_ref();
            assert_eq!(decode_uvarint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_compression() {
        // Small numbers should use fewer bytes (ZigZag encoding doubles values)
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, 63);
        assert_eq!(buf.len(), 1); // encodes as 126

        let mut buf = BytesMut::new();
        encode_varint(&mut buf, 64);
        assert_eq!(buf.len(), 2); // encodes as 128
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        for value in [0i64, 1, -1, 63, 64, -64, -65, 1 << 20, i64::MAX, i64::MIN] {
            let mut buf = BytesMut::new();
            encode_varint(&mut buf, value);
            assert_eq!(varint_len(value), buf.len(), "value {}", value);
        }
        for value in [0u64, 127, 128, 1 << 14, u64::MAX] {
            let mut buf = BytesMut::new();
            encode_uvarint(&mut buf, value);
            assert_eq!(uvarint_len(value), buf.len(), "value {}", value);
        }
    }

    #[test]
    fn test_decode_truncated_is_error() {
        let mut buf = BytesMut::new();
        encode_uvarint(&mut buf, u64::MAX);
        let truncated = &buf[..buf.len() - 1];
        let mut cursor = truncated;
        assert!(decode_uvarint(&mut cursor).is_err());
    }

    #[test]
    fn test_decode_overlong_is_error() {
        // Eleven continuation bytes can never be a valid 64-bit varint.
        let bad = [0xFFu8; 11];
        let mut cursor = &bad[..];
        assert!(decode_uvarint(&mut cursor).is_err());
    }

    #[test]
    fn test_try_decode_incomplete_returns_none() {
        let mut buf = BytesMut::new();
        encode_uvarint(&mut buf, 300);
        assert_eq!(try_decode_uvarint(&buf[..1]), None);
        assert_eq!(try_decode_uvarint(&buf), Some((300, 2)));
    }

    #[test]
    fn test_try_decode_reports_width() {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, -1234567);
        encode_uvarint(&mut buf, 7);

        let (v, w) = try_decode_varint(&buf).unwrap();
        assert_eq!(v, -1234567);
        let (u, w2) = try_decode_uvarint(&buf[w..]).unwrap();
        assert_eq!(u, 7);
        assert_eq!(w + w2, buf.len());
    }

    #[test]
    fn test_try_decode_empty() {
        assert_eq!(try_decode_uvarint(&[]), None);
        assert_eq!(try_decode_varint(&[]), None);
    }
}
