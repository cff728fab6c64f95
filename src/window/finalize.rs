use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::node::store::ScanNodeStore;
use crate::occurrence::bitset::OmissionSet;
use crate::occurrence::index::OccurrenceIndex;
use crate::page::sequencer::PageMarks;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, MarkIndex, PageIndex};

/// One finalized z-order entry of a page: a node and the marks it leaves out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ContentHash,
    /// Key of this element's omission pattern in the occurrence index.
    pub omission: ContentHash,
    pub anchor: MarkIndex,
    /// Marks the element covers.
    pub covered: u32,
    pub bbox: BBox,
    /// Pages the node was built on.
    pub pages: u32,
    /// Shared by more than one page, so worth a cached raster.
    pub cacheable: bool,
}

/// Immutable record of a page after window close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPage {
    pub index: PageIndex,
    pub mark_count: u32,
    /// Bottom to top.
    pub elements: Vec<Element>,
    /// Exclusive end of nested content, for marks that invoke any.
    pub extents: BTreeMap<MarkIndex, MarkIndex>,
}

impl ClosedPage {
    pub fn element(&self, id: &ContentHash) -> Option<&Element> {
        self.elements.iter().find(|element| &element.id == id)
    }

    pub fn extent_end(&self, mark: MarkIndex) -> MarkIndex {
        self.extents.get(&mark).copied().unwrap_or(mark + 1)
    }

    pub fn cacheable_elements(&self) -> impl Iterator<Item = &Element> + '_ {
        self.elements.iter().filter(|element| element.cacheable)
    }
}

/// Turn a built page into its element list, releasing every claim the page
/// held. Each element's omission pattern is recorded in `occurrences`.
pub fn finalize_page(
    page: PageMarks,
    store: &mut ScanNodeStore,
    occurrences: &mut OccurrenceIndex,
) -> ClosedPage {
    let (index, marks, zorder) = page.into_parts();
    let mark_count = marks.len() as u32;
    let extents = marks
        .iter()
        .enumerate()
        .filter(|(i, mark)| mark.extent_end > *i as MarkIndex + 1)
        .map(|(i, mark)| (i as MarkIndex, mark.extent_end))
        .collect();

    let mut elements = Vec::with_capacity(zorder.len());
    let mut destroyed = 0;
    for link in zorder.into_links() {
        let id = link.node();
        let pages = store
            .get(&id)
            .map_or(0, |node| occurrences.pages(&node.occurrence()).len()) as u32;
        let omission =
            occurrences.record_omission(OmissionSet::complement_of(mark_count, link.marks()));
        elements.push(Element {
            id,
            omission,
            anchor: link.anchor(),
            covered: link.width() as u32,
            bbox: link.bbox(),
            pages,
            cacheable: pages > 1,
        });
        if let Some(claim) = link.into_claim() {
            destroyed += store.release(claim);
        }
    }

    debug!(
        page = index,
        marks = mark_count,
        elements = elements.len(),
        destroyed,
        "closed page"
    );
    ClosedPage {
        index,
        mark_count,
        elements,
        extents,
    }
}

/// Pages held in memory between scanning and finalization.
///
/// With a limit, pushing past it evicts the oldest page for finalization;
/// without one the whole chunk stays until [`ScanWindow::drain`].
#[derive(Debug, Default)]
pub struct ScanWindow {
    pages: VecDeque<PageMarks>,
    limit: Option<usize>,
}

impl ScanWindow {
    pub fn new(limit: Option<usize>) -> Self {
        ScanWindow {
            pages: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, page: PageMarks) -> Option<PageMarks> {
        self.pages.push_back(page);
        match self.limit {
            Some(limit) if self.pages.len() > limit => self.pages.pop_front(),
            _ => None,
        }
    }

    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut PageMarks> + '_ {
        self.pages.iter_mut()
    }

    pub fn drain(&mut self) -> Vec<PageMarks> {
        self.pages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Discard every held page, returning its claims.
    pub fn release_all(&mut self, store: &mut ScanNodeStore) -> usize {
        self.pages.drain(..).map(|page| page.release(store)).sum()
    }
}
