//! ContentHash: a full 256-bit BLAKE3 content hash (64 hex chars).
//!
//! The hash is the deduplication key for the whole system: two uploads
//! with the same bytes produce the same ContentHash and therefore land
//! in the same physical blob. The first two hex characters are used as
//! a shard directory so no single directory accumulates millions of
//! entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A content hash - 256 bits (32 bytes, 64 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

/// Errors that can occur when working with content hashes.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hash length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    /// Hash a complete in-memory buffer.
    pub fn from_data(data: &[u8]) -> Self {
        let hash_bytes = blake3::hash(data);
        Self(hex::encode(hash_bytes.as_bytes()))
    }

    /// Create from an existing hash string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.len() != 64 {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Get the first 2 characters (used for directory sharding).
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Get the remainder after the prefix (used as filename).
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    /// Get the full hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Streaming hasher: feed chunks, get `(ContentHash, byte_size)` at the end.
///
/// The whole payload never has to be resident in memory. Staging writes
/// run their bytes through one of these so hashing and the disk write
/// happen in a single pass over the source stream.
#[derive(Debug)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    /// Feed a chunk into the running digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes
    }

    /// Finish the digest, returning the content hash and total byte count.
    pub fn finalize(self) -> (ContentHash, u64) {
        let hash_bytes = self.inner.finalize();
        (ContentHash(hex::encode(hash_bytes.as_bytes())), self.bytes)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_produces_64_hex_chars() {
        let hash = ContentHash::from_data(b"Hello, World!");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_from_data_is_deterministic() {
        let hash1 = ContentHash::from_data(b"test data");
        let hash2 = ContentHash::from_data(b"test data");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_from_data_different_input_different_hash() {
        let hash1 = ContentHash::from_data(b"data a");
        let hash2 = ContentHash::from_data(b"data b");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_prefix_and_remainder() {
        let hash = ContentHash::from_data(b"test");
        assert_eq!(hash.prefix().len(), 2);
        assert_eq!(hash.remainder().len(), 62);
        assert_eq!(
            format!("{}{}", hash.prefix(), hash.remainder()),
            hash.as_str()
        );
    }

    #[test]
    fn test_from_str_valid() {
        let hash_str = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";
        let hash: ContentHash = hash_str.parse().unwrap();
        assert_eq!(hash.as_str(), hash_str);
    }

    #[test]
    fn test_from_str_invalid_length() {
        let result: Result<ContentHash, _> = "short".parse();
        assert!(matches!(result, Err(HashError::InvalidLength(5))));
    }

    #[test]
    fn test_from_str_invalid_hex() {
        let bad = "z".repeat(64);
        let result: Result<ContentHash, _> = bad.parse();
        assert!(matches!(result, Err(HashError::InvalidHex)));
    }

    #[test]
    fn test_streaming_matches_from_data() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        let (hash, size) = hasher.finalize();

        assert_eq!(hash, ContentHash::from_data(b"Hello, World!"));
        assert_eq!(size, 13);
    }

    #[test]
    fn test_streaming_empty_input() {
        let (hash, size) = ContentHasher::new().finalize();
        assert_eq!(hash, ContentHash::from_data(b""));
        assert_eq!(size, 0);
    }

    #[test]
    fn test_display() {
        let hash = ContentHash::from_data(b"display test");
        assert_eq!(format!("{}", hash), hash.as_str());
    }
}
