use serde::Serialize;
use tracing::{debug, trace};

use crate::hash::digest::{tag, DigestWriter};
use crate::merge::legality::{can_reorder, mergeable, Candidate};
use crate::node::node::{NodeFlags, NodeSeed};
use crate::node::store::{NodeClaim, ScanNodeStore};
use crate::occurrence::index::OccurrenceIndex;
use crate::page::mark::Mark;
use crate::page::sequencer::PageMarks;
use crate::page::zorder::LinkId;
use crate::types::errors::ScanError;
use crate::types::identifiers::{ContentHash, MarkIndex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Atomic regions collapsed before the general pass.
    pub regions: usize,
    pub hoisted: usize,
    pub merges: usize,
    pub supernodes_created: usize,
    /// Links left on the page afterwards.
    pub links: usize,
}

impl BuildStats {
    pub fn accumulate(&mut self, other: &BuildStats) {
        self.regions += other.regions;
        self.hoisted += other.hoisted;
        self.merges += other.merges;
        self.supernodes_created += other.supernodes_created;
        self.links += other.links;
    }
}

/// Digest of a supernode: its leaf digests in z-order.
pub fn supernode_digest(leaves: &[ContentHash]) -> ContentHash {
    let mut w = DigestWriter::new("retain/supernode");
    w.u32(leaves.len() as u32);
    for leaf in leaves {
        w.tag(tag::MEMBER).hash(leaf);
    }
    w.finish()
}

/// Inclusive mark ranges flagged as atomic on the page.
pub fn flagged_regions(marks: &[Mark]) -> Vec<(MarkIndex, MarkIndex)> {
    let mut regions = Vec::new();
    let mut open: Option<MarkIndex> = None;
    for (index, mark) in marks.iter().enumerate() {
        let index = index as MarkIndex;
        if mark.region_start && open.is_none() {
            open = Some(index);
        }
        if mark.region_end {
            if let Some(start) = open.take() {
                regions.push((start, index));
            }
        }
    }
    regions
}

/// Rewrites one page's z-order into supernodes.
///
/// Runs in three steps: atomic regions are collapsed, hoistable links move
/// toward the top, then neighbours are merged into maximal runs.
pub struct SupernodeBuilder<'a> {
    store: &'a mut ScanNodeStore,
    occurrences: &'a mut OccurrenceIndex,
    lookahead: usize,
    stats: BuildStats,
}

impl<'a> SupernodeBuilder<'a> {
    pub fn new(
        store: &'a mut ScanNodeStore,
        occurrences: &'a mut OccurrenceIndex,
        lookahead: usize,
    ) -> Self {
        SupernodeBuilder {
            store,
            occurrences,
            lookahead,
            stats: BuildStats::default(),
        }
    }

    pub fn build(mut self, page: &mut PageMarks) -> Result<BuildStats, ScanError> {
        self.premerge_regions(page)?;
        self.hoist(page);
        self.merge_pass(page)?;
        page.mark_built();
        self.stats.links = page.zorder().len();
        debug!(
            page = page.index(),
            marks = page.mark_count(),
            links = self.stats.links,
            regions = self.stats.regions,
            hoisted = self.stats.hoisted,
            merges = self.stats.merges,
            "built supernodes"
        );
        Ok(self.stats)
    }

    fn candidate(&self, page: &PageMarks, id: LinkId) -> Candidate {
        let node = page
            .zorder()
            .get(id)
            .map_or(ContentHash::NOOP, |link| link.node());
        Candidate::of(node, self.store, self.occurrences)
    }

    /// Collapse every flagged region. Link `i` still wraps mark `i` here, so a
    /// region is a contiguous run of link ids.
    fn premerge_regions(&mut self, page: &mut PageMarks) -> Result<(), ScanError> {
        for (start, end) in flagged_regions(page.marks()) {
            if start == end {
                continue;
            }
            for member in start + 1..=end {
                self.merge_links(page, start as LinkId, member as LinkId)?;
            }
            self.stats.regions += 1;
        }
        Ok(())
    }

    /// Walk from the top down, lifting each hoistable link above every
    /// non-hoistable neighbour it can legally pass.
    pub fn hoist(&mut self, page: &mut PageMarks) {
        let order = page.zorder().ids();
        for &id in order.iter().rev() {
            if !self.candidate(page, id).hoistable() {
                continue;
            }
            let mut moved = false;
            while let Some(next) = page.zorder().next(id) {
                if self.candidate(page, next).hoistable() {
                    break;
                }
                let (Some(link), Some(above)) = (page.zorder().get(id), page.zorder().get(next))
                else {
                    break;
                };
                if !can_reorder(&link.bbox(), &above.bbox()) {
                    break;
                }
                page.zorder_mut().move_after(id, next);
                moved = true;
            }
            if moved {
                self.stats.hoisted += 1;
                trace!(page = page.index(), link = id, "hoisted link");
            }
        }
    }

    fn merge_pass(&mut self, page: &mut PageMarks) -> Result<(), ScanError> {
        let mut current = page.zorder().head();
        while let Some(run) = current {
            let Some(next) = page.zorder().next(run) else {
                break;
            };
            let lower = self.candidate(page, run);
            if mergeable(&lower, &self.candidate(page, next), self.occurrences) {
                self.merge_links(page, run, next)?;
                continue;
            }
            if let Some(found) = self.look_ahead(page, run, &lower) {
                page.zorder_mut().move_after(found, run);
                self.merge_links(page, run, found)?;
                continue;
            }
            current = Some(next);
        }
        Ok(())
    }

    /// A mergeable link a few places above `run` that can legally sink past
    /// everything between them.
    fn look_ahead(&self, page: &PageMarks, run: LinkId, lower: &Candidate) -> Option<LinkId> {
        let zorder = page.zorder();
        let mut passed = vec![zorder.next(run)?];
        let mut probe = zorder.next(passed[0]);
        for _ in 0..self.lookahead {
            let id = probe?;
            let link = zorder.get(id)?;
            if mergeable(lower, &self.candidate(page, id), self.occurrences)
                && passed.iter().all(|&p| {
                    zorder
                        .get(p)
                        .map_or(true, |other| can_reorder(&link.bbox(), &other.bbox()))
                })
            {
                return Some(id);
            }
            passed.push(id);
            probe = zorder.next(id);
        }
        None
    }

    /// Merge `upper` into `lower`, which sit next to each other with `lower`
    /// underneath.
    fn merge_links(
        &mut self,
        page: &mut PageMarks,
        lower: LinkId,
        upper: LinkId,
    ) -> Result<(), ScanError> {
        let page_index = page.index();
        let zorder = page.zorder();
        let (Some(below), Some(above)) = (zorder.get(lower), zorder.get(upper)) else {
            return Ok(());
        };
        let (below_node, above_node) = (below.node(), above.node());

        // Invisible marks ride along without changing identity.
        if below_node == ContentHash::NOOP || above_node == ContentHash::NOOP {
            let zorder = page.zorder_mut();
            let absorbed = zorder.absorb(lower, upper);
            let spare = if below_node == ContentHash::NOOP && above_node != ContentHash::NOOP {
                absorbed.and_then(|claim| zorder.replace_claim(lower, claim))
            } else {
                absorbed
            };
            if let Some(claim) = spare {
                self.store.release(claim);
            }
            self.stats.merges += 1;
            return Ok(());
        }

        let mut leaves = below.leaves().to_vec();
        leaves.extend_from_slice(above.leaves());
        let hash = supernode_digest(&leaves);
        let bbox = below.bbox().union(&above.bbox());

        let (below_flags, below_occ) = self.node_facts(&below_node);
        let (above_flags, above_occ) = self.node_facts(&above_node);
        let mut flags = below_flags;
        flags.merge(above_flags);
        flags.form_placeholder = below_flags.form_placeholder && above_flags.form_placeholder;
        let predicted = self.occurrences.intersect(&below_occ, &above_occ);

        let (claim, created) = self.store.lookup_or_create(hash, NodeSeed { bbox, flags })?;
        let zorder = page.zorder_mut();
        let above_claim = zorder.absorb(lower, upper);
        let below_claim = zorder.replace_claim(lower, claim);
        let replaced: Vec<NodeClaim> = below_claim.into_iter().chain(above_claim).collect();
        // Only pages the supernode is actually built on count as occurrences.
        self.store.note_page(hash, page_index, self.occurrences);
        if created {
            self.store.set_predicted(hash, predicted);
            self.store.adopt_originals(hash, replaced);
            self.stats.supernodes_created += 1;
        } else {
            for claim in replaced {
                self.store.release(claim);
            }
        }
        self.stats.merges += 1;
        trace!(
            page = page_index,
            supernode = ?hash,
            width = leaves.len(),
            created,
            "merged links"
        );
        Ok(())
    }

    fn node_facts(&self, node: &ContentHash) -> (NodeFlags, ContentHash) {
        self.store.get(node).map_or(
            (NodeFlags::default(), OccurrenceIndex::empty_key()),
            |n| (n.flags(), n.merge_occurrence()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::mark::{MarkAttrs, MarkKind};
    use crate::types::geometry::BBox;

    fn page_of(
        store: &mut ScanNodeStore,
        occurrences: &mut OccurrenceIndex,
        index: u32,
        marks: &[(&str, BBox, bool)],
    ) -> PageMarks {
        let mut page = PageMarks::new(index, 64);
        for &(label, bbox, significant) in marks {
            page.reserve_one().unwrap();
            let seed = NodeSeed {
                bbox,
                flags: NodeFlags {
                    significant,
                    ..NodeFlags::default()
                },
            };
            let hash = ContentHash::of(label.as_bytes());
            let (claim, _) = store.lookup_or_create(hash, seed).unwrap();
            store.note_page(hash, index, occurrences);
            let mark = page.record(claim, MarkAttrs::new(MarkKind::Path, 0));
            page.set_painted(mark, bbox);
        }
        page
    }

    #[test]
    fn digest_depends_on_member_order() {
        let (a, b) = (ContentHash::of(b"a"), ContentHash::of(b"b"));
        assert_ne!(supernode_digest(&[a, b]), supernode_digest(&[b, a]));
        assert_eq!(supernode_digest(&[a, b]), supernode_digest(&[a, b]));
    }

    #[test]
    fn shared_neighbours_collapse_into_one_supernode() {
        let mut store = ScanNodeStore::new(64);
        let mut occurrences = OccurrenceIndex::new();
        let boxes = [
            ("a", BBox::new(0.0, 0.0, 10.0, 10.0), true),
            ("b", BBox::new(20.0, 0.0, 30.0, 10.0), true),
        ];
        let mut first = page_of(&mut store, &mut occurrences, 0, &boxes);
        let mut second = page_of(&mut store, &mut occurrences, 1, &boxes);

        let stats = SupernodeBuilder::new(&mut store, &mut occurrences, 8)
            .build(&mut first)
            .unwrap();
        assert_eq!(stats.supernodes_created, 1);
        let stats = SupernodeBuilder::new(&mut store, &mut occurrences, 8)
            .build(&mut second)
            .unwrap();
        assert_eq!(stats.supernodes_created, 0);

        let node = first.zorder().iter().next().unwrap().node();
        assert_eq!(second.zorder().iter().next().unwrap().node(), node);
        assert_eq!(store.hit_count(&node), 2);
        assert_eq!(store.hit_count(&ContentHash::of(b"a")), 1);

        first.release(&mut store);
        second.release(&mut store);
        assert_eq!(store.live_nodes(), 0);
    }

    #[test]
    fn overlapping_variable_mark_stays_in_place() {
        let mut store = ScanNodeStore::new(64);
        let mut occurrences = OccurrenceIndex::new();
        let shared = ("bg", BBox::new(0.0, 0.0, 100.0, 100.0), true);
        let mut first = page_of(
            &mut store,
            &mut occurrences,
            0,
            &[("v0", BBox::new(10.0, 10.0, 20.0, 20.0), true), shared],
        );
        let mut second = page_of(
            &mut store,
            &mut occurrences,
            1,
            &[("v1", BBox::new(10.0, 10.0, 20.0, 20.0), true), shared],
        );

        let stats = SupernodeBuilder::new(&mut store, &mut occurrences, 8)
            .build(&mut second)
            .unwrap();
        assert_eq!(stats.hoisted, 0);
        assert_eq!(stats.merges, 0);
        let anchors: Vec<_> = second.zorder().iter().map(|l| l.anchor()).collect();
        assert_eq!(anchors, vec![0, 1]);

        first.release(&mut store);
        second.release(&mut store);
    }
}
