//! Fixed-width index keys.
//!
//! Every key of a tree has the same byte width and keys compare with a plain
//! function pointer. The encoders below produce bytes whose lexicographic
//! order matches the natural order of the source value, so `bytewise` is the
//! only comparator most callers need.

use anyhow::{bail, Result};
use std::cmp::Ordering;

pub use crate::storage::page::btree_page::KeyComparator;

/// Lexicographic byte comparison.
pub fn bytewise(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

pub struct IndexKey;

impl IndexKey {
    pub const I64_SIZE: usize = 8;

    /// Big-endian with the sign bit flipped.
    pub fn from_i64(value: i64) -> [u8; 8] {
        ((value as u64) ^ (1 << 63)).to_be_bytes()
    }

    /// Inverse of `from_i64`. Panics if `bytes` is shorter than 8.
    pub fn to_i64(bytes: &[u8]) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        (u64::from_be_bytes(buf) ^ (1 << 63)) as i64
    }

    pub fn from_u64(value: u64) -> [u8; 8] {
        value.to_be_bytes()
    }

    /// UTF-8 bytes right-padded with zeros to `width`.
    pub fn from_str_padded(s: &str, width: usize) -> Result<Vec<u8>> {
        if s.len() > width {
            bail!("Key {:?} is {} bytes, wider than {}", s, s.len(), width);
        }
        let mut key = vec![0u8; width];
        key[..s.len()].copy_from_slice(s.as_bytes());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i64_encoding_preserves_order() {
        let values = [i64::MIN, -1000, -1, 0, 1, 42, 1000, i64::MAX];
        for pair in values.windows(2) {
            let (a, b) = (IndexKey::from_i64(pair[0]), IndexKey::from_i64(pair[1]));
            assert_eq!(bytewise(&a, &b), Ordering::Less, "{} < {}", pair[0], pair[1]);
        }
        for v in values {
            assert_eq!(IndexKey::to_i64(&IndexKey::from_i64(v)), v);
        }
    }

    #[test]
    fn test_u64_encoding_preserves_order() {
        let a = IndexKey::from_u64(255);
        let b = IndexKey::from_u64(256);
        assert_eq!(bytewise(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_str_padded() -> Result<()> {
        let key = IndexKey::from_str_padded("abc", 6)?;
        assert_eq!(key, b"abc\0\0\0");
        assert_eq!(
            bytewise(&IndexKey::from_str_padded("ab", 4)?, &key[..4]),
            Ordering::Less
        );
        assert!(IndexKey::from_str_padded("too long", 4).is_err());
        Ok(())
    }
}
