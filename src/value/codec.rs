//! Value serialization strategies.

use crate::common::Result;
use crate::value::Value;

/// Turns cell values into the bytes stored in a column's blob heap.
///
/// Encoding must be deterministic: equal values must produce equal bytes,
/// because index lookups and column scans compare encoded bytes only.
///
/// The codec is chosen when a table is created or opened and handed to
/// every column explicitly; there is no process-wide default instance.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// `bincode` encoding of [`Value`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl ValueCodec for BincodeCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = BincodeCodec;
        let a = codec.encode(&Value::Text("abc".into())).unwrap();
        let b = codec.encode(&Value::Text("abc".into())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_variants_encode_differently() {
        let codec = BincodeCodec;
        let int = codec.encode(&Value::Int(1)).unwrap();
        let ts = codec.encode(&Value::Timestamp(1)).unwrap();
        assert_ne!(int, ts);
    }

    #[test]
    fn test_decode_recovers_value() {
        let codec = BincodeCodec;
        let value = Value::Bytes(vec![0, 255, 7]);
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = BincodeCodec;
        let err = codec.decode(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
