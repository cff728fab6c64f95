use std::collections::BTreeMap;

use crate::hash::digest::{tag, DigestWriter};
use crate::occurrence::bitset::OmissionSet;
use crate::types::identifiers::{ContentHash, PageIndex};

/// Auxiliary maps answering "which pages share this node" and "which marks
/// does this element leave out on its page".
///
/// Page-set keys are a fold over the sorted page list, so the same set of
/// pages always lands on the same key no matter how it was built.
#[derive(Debug, Default)]
pub struct OccurrenceIndex {
    page_sets: BTreeMap<ContentHash, Vec<PageIndex>>,
    omissions: BTreeMap<ContentHash, OmissionSet>,
}

impl OccurrenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of the empty page set.
    pub fn empty_key() -> ContentHash {
        DigestWriter::new("retain/occurrence").finish()
    }

    fn step(key: ContentHash, page: PageIndex) -> ContentHash {
        let mut w = DigestWriter::new("retain/occurrence-step");
        w.hash(&key).tag(tag::PAGE).u32(page);
        w.finish()
    }

    /// Key for an arbitrary sorted, deduplicated page list.
    pub fn key_for(pages: &[PageIndex]) -> ContentHash {
        pages
            .iter()
            .fold(Self::empty_key(), |key, &page| Self::step(key, page))
    }

    /// Pages recorded under `key`; empty for unknown keys.
    pub fn pages(&self, key: &ContentHash) -> &[PageIndex] {
        self.page_sets.get(key).map_or(&[], Vec::as_slice)
    }

    /// The set under `key` plus `page`. Appending a later page is the cheap path.
    pub fn extend(&mut self, key: ContentHash, page: PageIndex) -> ContentHash {
        let mut pages = self.pages(&key).to_vec();
        let next = match pages.last() {
            Some(&last) if last >= page => {
                if pages.binary_search(&page).is_ok() {
                    return key;
                }
                pages.push(page);
                pages.sort_unstable();
                Self::key_for(&pages)
            }
            _ => {
                pages.push(page);
                Self::step(key, page)
            }
        };
        self.page_sets.entry(next).or_insert(pages);
        next
    }

    /// Key of the pages present in both sets.
    pub fn intersect(&mut self, a: &ContentHash, b: &ContentHash) -> ContentHash {
        if a == b {
            return *a;
        }
        let (left, right) = (self.pages(a), self.pages(b));
        let mut common = Vec::with_capacity(left.len().min(right.len()));
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            match left[i].cmp(&right[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    common.push(left[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        self.insert_pages(common)
    }

    pub fn insert_pages(&mut self, mut pages: Vec<PageIndex>) -> ContentHash {
        pages.sort_unstable();
        pages.dedup();
        let key = Self::key_for(&pages);
        self.page_sets.entry(key).or_insert(pages);
        key
    }

    /// True when every page under `inner` is also under `outer`.
    pub fn is_subset(&self, inner: &ContentHash, outer: &ContentHash) -> bool {
        if inner == outer {
            return true;
        }
        let outer = self.pages(outer);
        self.pages(inner)
            .iter()
            .all(|page| outer.binary_search(page).is_ok())
    }

    pub fn record_omission(&mut self, set: OmissionSet) -> ContentHash {
        let key = set.digest();
        self.omissions.entry(key).or_insert(set);
        key
    }

    pub fn omission(&self, key: &ContentHash) -> Option<&OmissionSet> {
        self.omissions.get(key)
    }

    pub fn page_set_count(&self) -> usize {
        self.page_sets.len()
    }

    pub fn omission_count(&self) -> usize {
        self.omissions.len()
    }

    /// Forget page sets; omission patterns stay, replay still needs them.
    pub fn clear_page_sets(&mut self) {
        self.page_sets.clear();
    }

    pub fn clear(&mut self) {
        self.page_sets.clear();
        self.omissions.clear();
    }
}
