use sha2::{Digest, Sha256};

use crate::types::identifiers::ContentHash;

/// One-byte framing tags. Every value written to a digest is prefixed by its
/// tag so that differently-shaped inputs cannot collide by concatenation.
pub(crate) mod tag {
    pub const NULL: u8 = 0x01;
    pub const BOOL: u8 = 0x02;
    pub const INT: u8 = 0x03;
    pub const REAL: u8 = 0x04;
    pub const NAME: u8 = 0x05;
    pub const STRING: u8 = 0x06;
    pub const ARRAY: u8 = 0x07;
    pub const DICT: u8 = 0x08;
    pub const STREAM: u8 = 0x09;
    pub const NESTED: u8 = 0x0a;
    pub const BACKREF: u8 = 0x0b;
    pub const MALFORMED: u8 = 0x0c;
    pub const RESOURCE: u8 = 0x0d;
    pub const OPERATOR: u8 = 0x10;
    pub const SLOT: u8 = 0x11;
    pub const MEMBER: u8 = 0x20;
    pub const PAGE: u8 = 0x21;
}

/// Incremental, order-sensitive SHA-256 writer with a domain prefix.
pub struct DigestWriter {
    inner: Sha256,
}

impl DigestWriter {
    pub fn new(domain: &str) -> Self {
        let mut inner = Sha256::new();
        inner.update((domain.len() as u32).to_be_bytes());
        inner.update(domain.as_bytes());
        DigestWriter { inner }
    }

    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.inner.update([tag]);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.inner.update([value]);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    /// Numbers are canonical: an integral real is written exactly like the
    /// equal integer, `-0.0` like `0.0`, and every NaN alike.
    pub fn number(&mut self, value: f64) -> &mut Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
            return self.tag(tag::INT).i64(value as i64);
        }
        let bits = if value.is_nan() {
            f64::NAN.to_bits()
        } else {
            value.to_bits()
        };
        self.tag(tag::REAL).u64(bits)
    }

    /// Length-prefixed byte string.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update((bytes.len() as u64).to_be_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn hash(&mut self, hash: &ContentHash) -> &mut Self {
        self.inner.update(hash.as_bytes());
        self
    }

    pub fn finish(self) -> ContentHash {
        ContentHash::from_bytes(self.inner.finalize().into())
    }
}
