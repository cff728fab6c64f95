use crate::node::store::NodeClaim;
use crate::types::errors::ScanError;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, MarkIndex};

/// Stable slot of a link in [`ZOrder`]. Links are never reused, so an id
/// stays valid (if dead) after its link was absorbed into another.
pub type LinkId = usize;

/// One entry of the page's z-order: a single mark, or after merging a run of
/// marks collapsed into a supernode.
#[derive(Debug)]
pub struct Link {
    claim: Option<NodeClaim>,
    marks: Vec<MarkIndex>,
    leaves: Vec<ContentHash>,
    anchor: MarkIndex,
    bbox: BBox,
    prev: Option<LinkId>,
    next: Option<LinkId>,
}

impl Link {
    /// Node this link holds a claim on; the sentinel once the claim is gone.
    pub fn node(&self) -> ContentHash {
        self.claim.as_ref().map_or(ContentHash::NOOP, NodeClaim::key)
    }

    /// Covered mark indices, ascending.
    pub fn marks(&self) -> &[MarkIndex] {
        &self.marks
    }

    /// Digests of the single-mark nodes this link is made of, in z-order.
    /// Marks bound to the sentinel contribute nothing.
    pub fn leaves(&self) -> &[ContentHash] {
        &self.leaves
    }

    /// Lowest original mark index among the members.
    pub fn anchor(&self) -> MarkIndex {
        self.anchor
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn width(&self) -> usize {
        self.marks.len()
    }

    pub fn into_claim(self) -> Option<NodeClaim> {
        self.claim
    }
}

/// Intrusive doubly-linked list over a vector of links.
///
/// Moves and merges only rewrite `prev`/`next` indices.
#[derive(Debug, Default)]
pub struct ZOrder {
    links: Vec<Link>,
    head: Option<LinkId>,
    tail: Option<LinkId>,
    len: usize,
}

impl ZOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make room for one more link without aborting on allocation failure.
    pub fn reserve_one(&mut self) -> Result<(), ScanError> {
        if self.links.len() == self.links.capacity() {
            let grow = self.links.capacity().max(16);
            self.links
                .try_reserve(grow)
                .map_err(|_| ScanError::exhausted("page links", self.links.len()))?;
        }
        Ok(())
    }

    /// Append a single-mark link at the tail (topmost position).
    pub fn push_back(&mut self, claim: NodeClaim, mark: MarkIndex, bbox: BBox) -> LinkId {
        let id = self.links.len();
        let leaves = leaf_of(&claim);
        self.links.push(Link {
            claim: Some(claim),
            marks: vec![mark],
            leaves,
            anchor: mark,
            bbox,
            prev: None,
            next: None,
        });
        self.attach_after(id, self.tail);
        id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<LinkId> {
        self.head
    }

    pub fn tail(&self) -> Option<LinkId> {
        self.tail
    }

    pub fn next(&self, id: LinkId) -> Option<LinkId> {
        self.links.get(id).and_then(|link| link.next)
    }

    pub fn prev(&self, id: LinkId) -> Option<LinkId> {
        self.links.get(id).and_then(|link| link.prev)
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id).filter(|link| link.claim.is_some())
    }

    pub fn is_live(&self, id: LinkId) -> bool {
        self.get(id).is_some()
    }

    /// Live link ids from bottom (painted first) to top.
    pub fn ids(&self) -> Vec<LinkId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.links[id].next;
        }
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.links[id].next;
            Some(&self.links[id])
        })
    }

    fn detach(&mut self, id: LinkId) {
        let (prev, next) = (self.links[id].prev, self.links[id].next);
        match prev {
            Some(p) => self.links[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.tail = prev,
        }
        self.links[id].prev = None;
        self.links[id].next = None;
        self.len -= 1;
    }

    /// Insert a detached link after `after`, or at the head for `None`.
    fn attach_after(&mut self, id: LinkId, after: Option<LinkId>) {
        let next = match after {
            Some(a) => self.links[a].next,
            None => self.head,
        };
        self.links[id].prev = after;
        self.links[id].next = next;
        match after {
            Some(a) => self.links[a].next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.links[n].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Move `id` so that it sits directly above `target`.
    pub fn move_after(&mut self, id: LinkId, target: LinkId) {
        if id == target || !self.is_live(id) || !self.is_live(target) {
            return;
        }
        self.detach(id);
        self.attach_after(id, Some(target));
    }

    /// Swap the claim held by a live link, returning the old one. The link's
    /// leaves are kept: the new node stands for the same members.
    pub fn replace_claim(&mut self, id: LinkId, claim: NodeClaim) -> Option<NodeClaim> {
        let link = self.links.get_mut(id)?;
        if link.claim.is_none() {
            return Some(claim);
        }
        link.claim.replace(claim)
    }

    /// Bind a single-mark link to a different node.
    pub fn rebind(&mut self, id: LinkId, claim: NodeClaim) -> Option<NodeClaim> {
        let leaves = leaf_of(&claim);
        let old = self.replace_claim(id, claim);
        if let Some(link) = self.links.get_mut(id) {
            link.leaves = leaves;
        }
        old
    }

    pub fn set_bbox(&mut self, id: LinkId, bbox: BBox) {
        if let Some(link) = self.links.get_mut(id) {
            link.bbox = bbox;
        }
    }

    /// Fold `src` into `dst` and unlink it. `dst` must be below `src`, so the
    /// leaf order stays bottom to top. Returns the claim `src` held.
    pub fn absorb(&mut self, dst: LinkId, src: LinkId) -> Option<NodeClaim> {
        if dst == src || !self.is_live(dst) || !self.is_live(src) {
            return None;
        }
        self.detach(src);
        let source = &mut self.links[src];
        let claim = source.claim.take();
        let marks = std::mem::take(&mut source.marks);
        let leaves = std::mem::take(&mut source.leaves);
        let (anchor, bbox) = (source.anchor, source.bbox);

        let target = &mut self.links[dst];
        target.marks.extend(marks);
        target.marks.sort_unstable();
        target.leaves.extend(leaves);
        target.anchor = target.anchor.min(anchor);
        target.bbox = target.bbox.union(&bbox);
        claim
    }

    /// Consume the list, yielding live links bottom to top.
    pub fn into_links(mut self) -> Vec<Link> {
        let order = self.ids();
        let mut slots: Vec<Option<Link>> = self.links.drain(..).map(Some).collect();
        order
            .into_iter()
            .filter_map(|id| slots.get_mut(id).and_then(Option::take))
            .collect()
    }
}

/// The sentinel paints nothing and is never a leaf.
fn leaf_of(claim: &NodeClaim) -> Vec<ContentHash> {
    match claim.key() {
        ContentHash::NOOP => Vec::new(),
        key => vec![key],
    }
}
