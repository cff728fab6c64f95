use serde::{Deserialize, Serialize};

use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, MarkIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkKind {
    Path,
    Text,
    Image,
    /// Form invocation; its content arrives as nested marks.
    Form,
    Shading,
    InlineImage,
    /// Synthetic mark standing in for a page with nothing visible.
    EmptyPage,
}

impl MarkKind {
    pub fn is_placeholder(self) -> bool {
        self == MarkKind::Form
    }
}

/// What the sequencer needs to know about a mark besides its node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkAttrs {
    pub kind: MarkKind,
    /// Sub-content nesting depth, 0 for the page's own content stream.
    pub depth: u16,
    pub inline_len: u32,
    pub composited: bool,
}

impl MarkAttrs {
    pub fn new(kind: MarkKind, depth: u16) -> Self {
        MarkAttrs {
            kind,
            depth,
            inline_len: 0,
            composited: false,
        }
    }
}

/// One marking operation, in original content order.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub node: ContentHash,
    pub kind: MarkKind,
    pub depth: u16,
    pub inline_len: u32,
    pub composited: bool,
    pub region_start: bool,
    pub region_end: bool,
    /// Exclusive end of this mark's nested marks; `index + 1` when it has none.
    pub extent_end: MarkIndex,
    pub bbox: BBox,
}
