//! Stream byte offsets as stored on disk.
//!
//! Every durable object is addressed by the offset of its first byte in a
//! stream. On disk an offset is a signed 64-bit slot where `-1` means
//! "not yet written"; in memory that is `Option<u64>`.

use crate::common::config::NULL_POSITION;
use crate::common::{Error, Result};

/// Encode an optional position into its on-disk slot value.
#[inline]
pub fn encode_position(position: Option<u64>) -> i64 {
    match position {
        Some(pos) => pos as i64,
        None => NULL_POSITION,
    }
}

/// Decode an on-disk slot value. Negative values other than `-1` are corrupt.
pub fn decode_position(raw: i64) -> Result<Option<u64>> {
    match raw {
        NULL_POSITION => Ok(None),
        pos if pos >= 0 => Ok(Some(pos as u64)),
        other => Err(Error::Corrupted(format!("invalid stream position {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_encoding() {
        assert_eq!(encode_position(None), -1);
        assert_eq!(encode_position(Some(0)), 0);
        assert_eq!(encode_position(Some(4096)), 4096);
    }

    #[test]
    fn test_position_decoding() {
        assert_eq!(decode_position(-1).unwrap(), None);
        assert_eq!(decode_position(128).unwrap(), Some(128));
        assert!(matches!(decode_position(-7), Err(Error::Corrupted(_))));
    }
}
