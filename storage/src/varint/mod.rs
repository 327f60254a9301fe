//! Unsigned LEB128: seven value bits per byte, low group first, high bit set
//! on every byte except the last.

use crate::{Result, StorageError};
use bytes::BufMut;

/// Longest encoding of a `u64` (ceil(64 / 7)).
pub const MAX_VARINT_LEN: usize = 10;

pub fn put_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    put_varint(&mut out, value);
    out
}

pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decodes one varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
///
/// Non-minimal encodings (trailing zero groups) are accepted; groups that
/// would carry bits past the 64th are a decode error, as is running off the
/// end of `buf`.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        let group = (byte & 0x7F) as u64;
        if shift < 64 {
            if shift > 0 && group >> (64 - shift) != 0 {
                return Err(StorageError::Decode("varint overflows 64 bits".into()));
            }
            value |= group << shift;
        } else if group != 0 {
            return Err(StorageError::Decode("varint overflows 64 bits".into()));
        }

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift = shift.saturating_add(7);
    }

    Err(StorageError::Decode(format!(
        "truncated varint after {} bytes",
        buf.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries() {
        let cases = [
            0u64,
            127,
            128,
            1 << 32,
            1 << 40,
            (1 << 63) - 1,
            u64::MAX,
        ];
        for v in cases {
            let enc = encode_varint(v);
            assert_eq!(enc.len(), varint_len(v), "length of {}", v);
            assert_eq!(decode_varint(&enc).unwrap(), (v, enc.len()), "value {}", v);
        }
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(127), vec![0x7F]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
        assert_eq!(encode_varint(300), vec![0xAC, 0x02]);
        assert_eq!(encode_varint(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_trailing_zero_groups_accepted() {
        assert_eq!(decode_varint(&[0x81, 0x80, 0x00]).unwrap(), (1, 3));
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        assert_eq!(decode_varint(&[0x05, 0xFF, 0xFF]).unwrap(), (5, 1));
    }

    #[test]
    fn test_truncated() {
        assert!(decode_varint(&[]).is_err());
        assert!(decode_varint(&[0x80, 0x80]).is_err());
    }

    #[test]
    fn test_overflow() {
        let mut enc = encode_varint(u64::MAX);
        // The tenth byte may only carry one bit.
        *enc.last_mut().unwrap() = 0x02;
        assert!(decode_varint(&enc).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(v in any::<u64>()) {
            let enc = encode_varint(v);
            prop_assert_eq!(decode_varint(&enc).unwrap(), (v, enc.len()));
        }
    }
}
