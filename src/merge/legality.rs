use crate::node::store::ScanNodeStore;
use crate::occurrence::index::OccurrenceIndex;
use crate::types::geometry::BBox;
use crate::types::identifiers::ContentHash;

/// Two links may swap z-order when their boxes do not intersect.
///
/// This forbids some swaps that would render identically; it never allows
/// one that would not.
pub fn can_reorder(a: &BBox, b: &BBox) -> bool {
    !a.intersects(b)
}

/// What the merge rules look at for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub occurrence: ContentHash,
    pub pages: usize,
    pub significant: bool,
    /// Bound to the sentinel: paints nothing.
    pub invisible: bool,
}

impl Candidate {
    pub fn of(node: ContentHash, store: &ScanNodeStore, occurrences: &OccurrenceIndex) -> Self {
        match store.get(&node) {
            Some(n) if !n.is_sentinel() => Candidate {
                occurrence: n.merge_occurrence(),
                pages: occurrences.pages(&n.merge_occurrence()).len(),
                significant: n.flags().significant,
                invisible: false,
            },
            _ => Candidate {
                occurrence: OccurrenceIndex::empty_key(),
                pages: 0,
                significant: false,
                invisible: true,
            },
        }
    }

    /// Single-page content or content nobody would miss: moved to the top.
    pub fn hoistable(&self) -> bool {
        self.pages <= 1 || !self.significant
    }
}

/// Whether two z-adjacent candidates should become one supernode.
pub fn mergeable(a: &Candidate, b: &Candidate, occurrences: &OccurrenceIndex) -> bool {
    if a.invisible || b.invisible {
        return true;
    }
    if a.occurrence == b.occurrence {
        return true;
    }
    // Variable data on both sides.
    if a.pages <= 1 && b.pages <= 1 {
        return true;
    }
    match (a.significant, b.significant) {
        // The insignificant side joins only if it lives everywhere the
        // significant side does, so the merged node keeps every page.
        (true, false) => occurrences.is_subset(&a.occurrence, &b.occurrence),
        (false, true) => occurrences.is_subset(&b.occurrence, &a.occurrence),
        (false, false) => {
            occurrences.is_subset(&a.occurrence, &b.occurrence)
                || occurrences.is_subset(&b.occurrence, &a.occurrence)
        }
        (true, true) => false,
    }
}
