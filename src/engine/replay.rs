use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::occurrence::bitset::OmissionSet;
use crate::ops::classify;
use crate::phase::hooks::Verdict;
use crate::phase::state::Phase;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, MarkIndex, PageIndex};
use crate::window::finalize::ClosedPage;

/// How one element of a page gets onto the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassAction {
    /// Composite the cached raster; nothing is interpreted.
    Replay,
    /// Render only this element and retain the raster in the store.
    Store,
    /// Render only this element and hand the raster to an external consumer.
    Export,
    /// Variable content: render directly, no raster is kept.
    Render,
}

impl PassAction {
    pub fn phase(self) -> Phase {
        match self {
            PassAction::Replay => Phase::Replaying,
            PassAction::Store => Phase::Storing,
            PassAction::Export => Phase::Exporting,
            PassAction::Render => Phase::Normal,
        }
    }

    pub fn produces_raster(self) -> bool {
        matches!(self, PassAction::Store | PassAction::Export)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassPlan {
    pub element: ContentHash,
    pub action: PassAction,
    pub omission: ContentHash,
    pub anchor: MarkIndex,
    pub bbox: BBox,
}

/// Passes that produce one page, bottom to top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePlan {
    pub page: PageIndex,
    pub passes: Vec<PassPlan>,
}

impl PagePlan {
    pub fn replayed(&self) -> usize {
        self.passes
            .iter()
            .filter(|pass| pass.action == PassAction::Replay)
            .count()
    }
}

/// Result of one finished pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    pub page: PageIndex,
    pub element: ContentHash,
    pub action: PassAction,
    /// Marks the interpreter was allowed to run, ascending.
    pub executed: Vec<MarkIndex>,
    pub skipped: u32,
}

/// Per-operator execute/skip decisions for one pass, driven by the
/// element's omission pattern.
#[derive(Debug, Clone)]
pub struct PassGate {
    mask: OmissionSet,
    extents: BTreeMap<MarkIndex, MarkIndex>,
    cursor: MarkIndex,
    executed: Vec<MarkIndex>,
    skipped: u32,
    glyph_depth: u32,
    abandon: bool,
}

impl PassGate {
    pub fn new(page: &ClosedPage, mask: OmissionSet) -> Self {
        PassGate {
            mask,
            extents: page.extents.clone(),
            cursor: 0,
            executed: Vec::new(),
            skipped: 0,
            glyph_depth: 0,
            abandon: false,
        }
    }

    /// Gate for a replayed element: the interpreter has nothing to run.
    pub fn replay(page: &ClosedPage) -> Self {
        PassGate {
            abandon: true,
            ..Self::new(page, OmissionSet::complement_of(page.mark_count, &[]))
        }
    }

    pub fn decide(&mut self, op: &str) -> Verdict {
        if self.abandon {
            return Verdict::AbandonPass;
        }
        if self.glyph_depth > 0 || !classify(op).is_marking() {
            return Verdict::Execute;
        }
        let index = self.cursor;
        if self.mask.contains(index) {
            // Skipping a mark skips whatever content it would have invoked.
            self.cursor = self.extents.get(&index).copied().unwrap_or(index + 1);
            self.skipped += 1;
            Verdict::Skip
        } else {
            self.cursor += 1;
            self.executed.push(index);
            Verdict::Execute
        }
    }

    pub fn enter_glyph(&mut self) {
        self.glyph_depth += 1;
    }

    pub fn exit_glyph(&mut self) {
        self.glyph_depth = self.glyph_depth.saturating_sub(1);
    }

    pub fn executed(&self) -> &[MarkIndex] {
        &self.executed
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub(crate) fn into_outcome(self) -> (Vec<MarkIndex>, u32) {
        (self.executed, self.skipped)
    }
}
