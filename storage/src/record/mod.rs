//! Row encoding: a varint value count followed by one tagged value per
//! column. INT values are varints of their two's-complement bit pattern;
//! TEXT values are a varint length and the raw bytes.

use crate::varint::{decode_varint, put_varint};
use crate::{Result, StorageError, Value};
use bytes::BufMut;

const TAG_INT: u8 = 0;
const TAG_TEXT: u8 = 1;

pub fn encode_record(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    put_varint(&mut out, values.len() as u64);
    for value in values {
        match value {
            Value::Int(i) => {
                out.put_u8(TAG_INT);
                put_varint(&mut out, *i as u64);
            }
            Value::Text(bytes) => {
                out.put_u8(TAG_TEXT);
                put_varint(&mut out, bytes.len() as u64);
                out.put_slice(bytes);
            }
        }
    }
    out
}

pub fn decode_record(buf: &[u8]) -> Result<Vec<Value>> {
    let (count, mut pos) = decode_varint(buf)?;

    // Every value takes at least two bytes, so a count larger than that is
    // garbage and must not drive the allocation.
    let mut values = Vec::with_capacity((count as usize).min(buf.len() / 2));

    for index in 0..count {
        let tag = *buf.get(pos).ok_or_else(|| {
            StorageError::Decode(format!("record ends before value {}", index))
        })?;
        pos += 1;

        let (raw, used) = decode_varint(&buf[pos..])?;
        pos += used;

        match tag {
            TAG_INT => values.push(Value::Int(raw as i64)),
            TAG_TEXT => {
                let len = usize::try_from(raw)
                    .map_err(|_| StorageError::Decode("text length overflow".into()))?;
                let end = pos
                    .checked_add(len)
                    .filter(|&end| end <= buf.len())
                    .ok_or_else(|| {
                        StorageError::Decode(format!(
                            "text value {} needs {} bytes, {} left",
                            index,
                            len,
                            buf.len() - pos
                        ))
                    })?;
                values.push(Value::Text(buf[pos..end].to_vec()));
                pos = end;
            }
            other => {
                return Err(StorageError::Decode(format!(
                    "unknown type tag {} for value {}",
                    other, index
                )))
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_int_and_text() {
        let row = vec![Value::Int(42), Value::from("hello")];
        let bytes = encode_record(&row);
        assert_eq!(bytes, vec![2, TAG_INT, 42, TAG_TEXT, 5, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(decode_record(&bytes).unwrap(), row);
    }

    #[test]
    fn test_empty_record() {
        let bytes = encode_record(&[]);
        assert_eq!(bytes, vec![0]);
        assert!(decode_record(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_negative_int_keeps_bit_pattern() {
        let bytes = encode_record(&[Value::Int(-1)]);
        // No zig-zag: -1 is all ones, ten varint bytes.
        assert_eq!(bytes.len(), 1 + 1 + 10);
        assert_eq!(decode_record(&bytes).unwrap(), vec![Value::Int(-1)]);
    }

    #[test]
    fn test_extremes() {
        let row = vec![
            Value::Int(i64::MIN),
            Value::Int(i64::MAX),
            Value::Int(0),
            Value::Text(Vec::new()),
            Value::Text(vec![0, 1, 2, 0x7F, 0xFF, b'\n']),
            Value::Text(vec![b'z'; 100_000]),
        ];
        assert_eq!(decode_record(&encode_record(&row)).unwrap(), row);
    }

    #[test]
    fn test_deterministic() {
        let row = vec![Value::Int(7), Value::from("same")];
        assert_eq!(encode_record(&row), encode_record(&row));
    }

    #[test]
    fn test_truncated_text_is_an_error() {
        let mut bytes = encode_record(&[Value::from("truncate me")]);
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(decode_record(&bytes), Err(StorageError::Decode(_))));
    }

    #[test]
    fn test_missing_values_is_an_error() {
        // Claims three values, carries one.
        let bytes = vec![3, TAG_INT, 1];
        assert!(decode_record(&bytes).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        assert!(decode_record(&[1, 9, 0]).is_err());
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Int),
            proptest::collection::vec(any::<u8>(), 0..300).prop_map(Value::Text),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(row in proptest::collection::vec(value_strategy(), 0..20)) {
            prop_assert_eq!(decode_record(&encode_record(&row)).unwrap(), row);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            decode_record(&bytes).ok();
        }
    }
}
