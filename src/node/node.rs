use serde::Serialize;

use crate::node::store::NodeClaim;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, PageIndex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeFlags {
    /// Invokes sub-content (a form) and paints nothing by itself.
    pub form_placeholder: bool,
    pub explicit_reference: bool,
    /// Drawn under transparency (soft mask, blend mode, constant alpha).
    pub composited: bool,
    pub pattern: bool,
    pub significant: bool,
}

impl NodeFlags {
    pub fn merge(&mut self, other: NodeFlags) {
        self.form_placeholder |= other.form_placeholder;
        self.explicit_reference |= other.explicit_reference;
        self.composited |= other.composited;
        self.pattern |= other.pattern;
        self.significant |= other.significant;
    }
}

/// Attributes supplied when a node may need creating.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeSeed {
    pub bbox: BBox,
    pub flags: NodeFlags,
}

/// One distinct, hashable visual mark (or merged run of marks).
#[derive(Debug)]
pub struct ScanNode {
    pub(crate) hash: ContentHash,
    pub(crate) hits: u32,
    pub(crate) bbox: BBox,
    pub(crate) flags: NodeFlags,
    pub(crate) last_page: Option<PageIndex>,
    pub(crate) occurrence: ContentHash,
    /// For a supernode, the pages all its members shared when it was formed.
    pub(crate) predicted: Option<ContentHash>,
    /// Claims a supernode holds on the nodes it replaced.
    pub(crate) originals: Vec<NodeClaim>,
    pub(crate) pinned: bool,
}

impl ScanNode {
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn last_page(&self) -> Option<PageIndex> {
        self.last_page
    }

    /// Key of this node's page set in the occurrence index.
    pub fn occurrence(&self) -> ContentHash {
        self.occurrence
    }

    /// Page set the merge rules reason with. Wider than [`occurrence`] for a
    /// supernode whose members also sit apart on some pages.
    ///
    /// [`occurrence`]: ScanNode::occurrence
    pub fn merge_occurrence(&self) -> ContentHash {
        self.predicted.unwrap_or(self.occurrence)
    }

    pub fn originals(&self) -> impl Iterator<Item = ContentHash> + '_ {
        self.originals.iter().map(NodeClaim::key)
    }

    pub fn is_supernode(&self) -> bool {
        !self.originals.is_empty()
    }

    pub fn is_sentinel(&self) -> bool {
        self.hash == ContentHash::NOOP
    }
}
