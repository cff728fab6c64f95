use crate::node::store::{NodeClaim, ScanNodeStore};
use crate::page::mark::{Mark, MarkAttrs, MarkKind};
use crate::page::zorder::ZOrder;
use crate::types::errors::ScanError;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, MarkIndex, PageIndex};

/// Marks of one page in content order, plus the page's z-order.
///
/// Until the supernode builder runs, link `i` wraps mark `i`.
#[derive(Debug)]
pub struct PageMarks {
    index: PageIndex,
    marks: Vec<Mark>,
    zorder: ZOrder,
    max_marks: usize,
    built: bool,
}

impl PageMarks {
    pub fn new(index: PageIndex, max_marks: usize) -> Self {
        PageMarks {
            index,
            marks: Vec::new(),
            zorder: ZOrder::new(),
            max_marks,
            built: false,
        }
    }

    pub fn index(&self) -> PageIndex {
        self.index
    }

    pub fn mark_count(&self) -> u32 {
        self.marks.len() as u32
    }

    /// Index the next recorded mark will get.
    pub fn next_index(&self) -> MarkIndex {
        self.marks.len() as MarkIndex
    }

    /// Supernodes have been built; the z-order no longer maps link to mark.
    pub fn is_built(&self) -> bool {
        self.built
    }

    pub(crate) fn mark_built(&mut self) {
        self.built = true;
    }

    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    pub fn mark(&self, index: MarkIndex) -> Option<&Mark> {
        self.marks.get(index as usize)
    }

    pub(crate) fn marks_mut(&mut self) -> &mut [Mark] {
        &mut self.marks
    }

    pub fn zorder(&self) -> &ZOrder {
        &self.zorder
    }

    pub(crate) fn zorder_mut(&mut self) -> &mut ZOrder {
        &mut self.zorder
    }

    /// Ensure one more mark fits. Call before claiming the mark's node, so
    /// a failure never strands a claim.
    pub fn reserve_one(&mut self) -> Result<(), ScanError> {
        if self.marks.len() >= self.max_marks {
            return Err(ScanError::exhausted("marks per page", self.max_marks));
        }
        if self.marks.len() == self.marks.capacity() {
            let grow = self.marks.capacity().max(16);
            self.marks
                .try_reserve(grow)
                .map_err(|_| ScanError::exhausted("page marks", self.marks.len()))?;
        }
        self.zorder.reserve_one()
    }

    /// Append a mark bound to `claim` and link it at the top of the z-order.
    pub fn record(&mut self, claim: NodeClaim, attrs: MarkAttrs) -> MarkIndex {
        let index = self.next_index();
        self.marks.push(Mark {
            node: claim.key(),
            kind: attrs.kind,
            depth: attrs.depth,
            inline_len: attrs.inline_len,
            composited: attrs.composited,
            region_start: false,
            region_end: false,
            extent_end: index + 1,
            bbox: BBox::EMPTY,
        });
        self.zorder.push_back(claim, index, BBox::EMPTY);
        index
    }

    /// Painted extent reported after the mark's operator ran.
    pub fn set_painted(&mut self, index: MarkIndex, bbox: BBox) {
        if let Some(mark) = self.marks.get_mut(index as usize) {
            mark.bbox = bbox;
            self.zorder.set_bbox(index as usize, bbox);
        }
    }

    /// Widen a placeholder mark by what its nested content painted.
    pub(crate) fn widen(&mut self, index: MarkIndex, bbox: BBox) {
        if let Some(mark) = self.marks.get_mut(index as usize) {
            mark.bbox = mark.bbox.union(&bbox);
            let widened = mark.bbox;
            self.zorder.set_bbox(index as usize, widened);
        }
    }

    pub fn set_extent_end(&mut self, index: MarkIndex, end: MarkIndex) {
        if let Some(mark) = self.marks.get_mut(index as usize) {
            mark.extent_end = end.max(index + 1);
        }
    }

    /// Bind a mark to a different node, returning the claim it held.
    pub fn rebind(&mut self, index: MarkIndex, claim: NodeClaim) -> Option<NodeClaim> {
        let mark = self.marks.get_mut(index as usize)?;
        mark.node = claim.key();
        self.zorder.rebind(index as usize, claim)
    }

    /// True when nothing but form placeholders was recorded.
    pub fn is_visually_empty(&self) -> bool {
        self.marks.iter().all(|mark| mark.kind.is_placeholder())
    }

    /// Record the synthetic empty-page mark when the page has nothing visible,
    /// so every page ends up with at least one element.
    pub fn ensure_not_empty(&mut self, store: &mut ScanNodeStore) -> Result<bool, ScanError> {
        if !self.is_visually_empty() {
            return Ok(false);
        }
        self.reserve_one()?;
        let (claim, _) = store.lookup_or_create(ContentHash::EMPTY_PAGE, Default::default())?;
        self.record(claim, MarkAttrs::new(MarkKind::EmptyPage, 0));
        Ok(true)
    }

    /// Give back every claim the page still holds. Used when a scan is
    /// discarded before the page was finalized.
    pub fn release(self, store: &mut ScanNodeStore) -> usize {
        let mut destroyed = 0;
        for link in self.zorder.into_links() {
            if let Some(claim) = link.into_claim() {
                destroyed += store.release(claim);
            }
        }
        destroyed
    }

    pub(crate) fn into_parts(self) -> (PageIndex, Vec<Mark>, ZOrder) {
        (self.index, self.marks, self.zorder)
    }
}
