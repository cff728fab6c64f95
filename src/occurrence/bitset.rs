use serde::{Deserialize, Serialize};

use crate::hash::digest::DigestWriter;
use crate::types::identifiers::{ContentHash, MarkIndex};

/// Per-page set of omitted mark indices.
///
/// Bits past `len` are always zero, so equality, counting and hashing can
/// work on whole words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmissionSet {
    len: u32,
    words: Vec<u64>,
}

impl OmissionSet {
    /// Nothing omitted.
    pub fn empty(len: u32) -> Self {
        OmissionSet {
            len,
            words: vec![0; (len as usize).div_ceil(64)],
        }
    }

    /// Every mark omitted except `covered`.
    pub fn complement_of(len: u32, covered: &[MarkIndex]) -> Self {
        let mut set = OmissionSet {
            len,
            words: vec![u64::MAX; (len as usize).div_ceil(64)],
        };
        set.clear_padding();
        for &index in covered {
            set.remove(index);
        }
        set
    }

    fn clear_padding(&mut self) {
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, index: MarkIndex) {
        if index < self.len {
            self.words[(index / 64) as usize] |= 1u64 << (index % 64);
        }
    }

    pub fn remove(&mut self, index: MarkIndex) {
        if index < self.len {
            self.words[(index / 64) as usize] &= !(1u64 << (index % 64));
        }
    }

    /// Indices at or past `len` are never omitted.
    pub fn contains(&self, index: MarkIndex) -> bool {
        index < self.len && self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    pub fn omitted_count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Omitted indices, ascending.
    pub fn iter(&self) -> impl Iterator<Item = MarkIndex> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros();
                bits &= bits - 1;
                Some(word_index as u32 * 64 + bit)
            })
        })
    }

    /// Indices that are not omitted, ascending.
    pub fn retained(&self) -> impl Iterator<Item = MarkIndex> + '_ {
        (0..self.len).filter(move |&i| !self.contains(i))
    }

    pub fn digest(&self) -> ContentHash {
        let mut w = DigestWriter::new("retain/omission");
        w.u32(self.len);
        for word in &self.words {
            w.u64(*word);
        }
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_keeps_padding_clear() {
        let set = OmissionSet::complement_of(70, &[0, 69]);
        assert_eq!(set.omitted_count(), 68);
        assert!(!set.contains(0));
        assert!(set.contains(1));
        assert!(!set.contains(69));
        assert!(!set.contains(70));
        assert_eq!(set.iter().count(), 68);
        assert_eq!(set.retained().collect::<Vec<_>>(), vec![0, 69]);
    }

    #[test]
    fn equal_patterns_share_a_digest() {
        let a = OmissionSet::complement_of(5, &[1, 2]);
        let mut b = OmissionSet::empty(5);
        for i in [0, 3, 4] {
            b.insert(i);
        }
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), OmissionSet::empty(5).digest());
    }
}
