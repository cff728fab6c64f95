use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of every content digest, in bytes.
pub const DIGEST_LEN: usize = 32;

/// Zero-based page position within a job.
pub type PageIndex = u32;

/// Zero-based position of a mark within its page, in original (pre-reorder) order.
pub type MarkIndex = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Digest must start with \"sha256:\": {0}")]
    MissingPrefix(String),
    #[error("Digest is not valid hex: {0}")]
    InvalidHex(String),
    #[error("Digest has {0} bytes, expected 32")]
    InvalidLength(usize),
}

/// Fixed-width content digest.
///
/// Identifies scan nodes, supernodes, elements, occurrence sets and omission
/// patterns. Two reserved values exist: [`ContentHash::NOOP`] for the sentinel
/// "no visible mark" node and [`ContentHash::EMPTY_PAGE`] for the synthetic
/// mark of a page that produced nothing visible.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    pub const NOOP: ContentHash = ContentHash([0u8; DIGEST_LEN]);
    pub const EMPTY_PAGE: ContentHash = ContentHash([0xffu8; DIGEST_LEN]);

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        ContentHash(bytes)
    }

    /// Digest of a raw byte string.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        ContentHash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True for the two reserved digests.
    pub fn is_reserved(&self) -> bool {
        *self == Self::NOOP || *self == Self::EMPTY_PAGE
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight bytes are plenty to tell digests apart in logs.
        write!(f, "ContentHash({}…)", hex::encode(&self.0[..8]))
    }
}

impl FromStr for ContentHash {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("sha256:")
            .ok_or_else(|| IdentifierError::MissingPrefix(s.to_string()))?;
        let bytes = hex::decode(hex_part).map_err(|_| IdentifierError::InvalidHex(s.to_string()))?;
        let array: [u8; DIGEST_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentifierError::InvalidLength(bytes.len()))?;
        Ok(ContentHash(array))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let hash = ContentHash::of(b"page content");
        let text = hash.to_string();
        assert!(text.starts_with("sha256:"));
        assert_eq!(text.parse::<ContentHash>().unwrap(), hash);
    }

    #[test]
    fn parse_rejects_short_digest() {
        assert_eq!(
            "sha256:abcd".parse::<ContentHash>(),
            Err(IdentifierError::InvalidLength(2))
        );
        assert!(matches!(
            "md5:abcd".parse::<ContentHash>(),
            Err(IdentifierError::MissingPrefix(_))
        ));
    }

    #[test]
    fn reserved_digests_differ_from_real_content() {
        assert_ne!(ContentHash::of(b""), ContentHash::NOOP);
        assert!(ContentHash::NOOP.is_reserved());
        assert!(ContentHash::EMPTY_PAGE.is_reserved());
    }
}
