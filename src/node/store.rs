use std::collections::HashMap;

use serde::Serialize;

use crate::node::node::{NodeFlags, NodeSeed, ScanNode};
use crate::occurrence::index::OccurrenceIndex;
use crate::types::errors::ScanError;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, PageIndex};

/// Ownership token for one hit-count unit on a node.
///
/// Only the store mints claims, and a claim goes back to the store through
/// [`ScanNodeStore::release`]. Claims are not `Clone`.
#[must_use = "a claim must be released back to the store"]
#[derive(Debug, PartialEq, Eq)]
pub struct NodeClaim {
    key: ContentHash,
}

impl NodeClaim {
    pub fn key(&self) -> ContentHash {
        self.key
    }
}

/// Result of recording that a node was seen on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sighting {
    /// The node had already been seen on another page.
    pub shared: bool,
    /// That other page, when it was the only one so far.
    pub sole_previous: Option<PageIndex>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub live: usize,
    pub created: u64,
    pub destroyed: u64,
}

/// Content-addressable registry: exactly one node per digest.
///
/// A node lives while its hit count is positive and is removed the moment
/// the count reaches zero. The sentinel [`ContentHash::NOOP`] node is pinned.
pub struct ScanNodeStore {
    nodes: HashMap<ContentHash, ScanNode>,
    max_nodes: usize,
    created: u64,
    destroyed: u64,
}

impl ScanNodeStore {
    pub fn new(max_nodes: usize) -> Self {
        let mut store = ScanNodeStore {
            nodes: HashMap::new(),
            max_nodes,
            created: 0,
            destroyed: 0,
        };
        store.insert_sentinel();
        store
    }

    fn insert_sentinel(&mut self) {
        self.nodes.insert(
            ContentHash::NOOP,
            ScanNode {
                hash: ContentHash::NOOP,
                hits: 0,
                bbox: BBox::EMPTY,
                flags: NodeFlags::default(),
                last_page: None,
                occurrence: OccurrenceIndex::empty_key(),
                predicted: None,
                originals: Vec::new(),
                pinned: true,
            },
        );
    }

    /// Claim the node for `hash`, creating it from `seed` on a miss.
    /// Returns the claim and whether the node was created.
    pub fn lookup_or_create(
        &mut self,
        hash: ContentHash,
        seed: NodeSeed,
    ) -> Result<(NodeClaim, bool), ScanError> {
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.hits += 1;
            node.flags.merge(seed.flags);
            node.bbox = node.bbox.union(&seed.bbox);
            return Ok((NodeClaim { key: hash }, false));
        }

        if self.live_nodes() >= self.max_nodes {
            return Err(ScanError::exhausted("scan nodes", self.max_nodes));
        }
        self.nodes
            .try_reserve(1)
            .map_err(|_| ScanError::exhausted("scan node table", self.nodes.len()))?;
        self.nodes.insert(
            hash,
            ScanNode {
                hash,
                hits: 1,
                bbox: seed.bbox,
                flags: seed.flags,
                last_page: None,
                occurrence: OccurrenceIndex::empty_key(),
                predicted: None,
                originals: Vec::new(),
                pinned: false,
            },
        );
        self.created += 1;
        Ok((NodeClaim { key: hash }, true))
    }

    /// Give one hit-count unit back. Destroys the node at zero, which in turn
    /// releases whatever originals a supernode was holding.
    /// Returns the number of nodes destroyed.
    pub fn release(&mut self, claim: NodeClaim) -> usize {
        let mut destroyed = 0;
        let mut pending = vec![claim];
        while let Some(claim) = pending.pop() {
            let Some(node) = self.nodes.get_mut(&claim.key) else {
                tracing::warn!(node = ?claim.key, "released a claim on an unknown node");
                continue;
            };
            debug_assert!(node.hits > 0, "hit count underflow on {:?}", claim.key);
            node.hits = node.hits.saturating_sub(1);
            if node.hits == 0 && !node.pinned {
                if let Some(node) = self.nodes.remove(&claim.key) {
                    destroyed += 1;
                    pending.extend(node.originals);
                }
            }
        }
        self.destroyed += destroyed as u64;
        destroyed
    }

    /// Hand a freshly created supernode the claims on the nodes it replaces.
    /// A node that already has originals keeps them; the extra claims are released.
    pub fn adopt_originals(&mut self, supernode: ContentHash, originals: Vec<NodeClaim>) {
        match self.nodes.get_mut(&supernode) {
            Some(node) if node.originals.is_empty() && !node.pinned => {
                node.originals = originals;
            }
            _ => {
                for claim in originals {
                    self.release(claim);
                }
            }
        }
    }

    /// Append `page` to the node's occurrence set unless already recorded.
    pub fn note_page(
        &mut self,
        hash: ContentHash,
        page: PageIndex,
        occurrences: &mut OccurrenceIndex,
    ) -> Sighting {
        let Some(node) = self.nodes.get_mut(&hash) else {
            return Sighting::default();
        };
        if node.pinned || node.last_page == Some(page) {
            return Sighting::default();
        }
        let previous = occurrences.pages(&node.occurrence);
        let sighting = Sighting {
            shared: previous.iter().any(|&p| p != page),
            sole_previous: match previous {
                [only] if *only != page => Some(*only),
                _ => None,
            },
        };
        node.occurrence = occurrences.extend(node.occurrence, page);
        node.last_page = Some(page);
        sighting
    }

    pub(crate) fn set_predicted(&mut self, hash: ContentHash, occurrence: ContentHash) {
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.predicted = Some(occurrence);
        }
    }

    pub fn widen_bbox(&mut self, hash: ContentHash, bbox: BBox) {
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.bbox = node.bbox.union(&bbox);
        }
    }

    pub fn add_flags(&mut self, hash: ContentHash, flags: NodeFlags) {
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.flags.merge(flags);
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&ScanNode> {
        self.nodes.get(hash)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Zero for nodes that do not exist.
    pub fn hit_count(&self, hash: &ContentHash) -> u32 {
        self.nodes.get(hash).map_or(0, |node| node.hits)
    }

    /// Live nodes, not counting the sentinel.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            live: self.live_nodes(),
            created: self.created,
            destroyed: self.destroyed,
        }
    }

    /// Drop every node regardless of outstanding claims. Teardown only.
    pub(crate) fn clear(&mut self) {
        let dropped = self.live_nodes();
        self.nodes.clear();
        self.destroyed += dropped as u64;
        self.insert_sentinel();
    }
}
