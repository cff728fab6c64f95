use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RetainConfig;
use crate::hash::digest::{tag, DigestWriter};
use crate::hash::gstate::{GraphicsDigest, Slot};
use crate::hash::hasher::{HashContext, HashFacts};
use crate::hash::resolver::ResourceResolver;
use crate::node::node::{NodeFlags, NodeSeed};
use crate::node::store::ScanNodeStore;
use crate::occurrence::index::OccurrenceIndex;
use crate::ops::{classify, OpClass};
use crate::page::atomic::AtomicRegionTracker;
use crate::page::mark::{MarkAttrs, MarkKind};
use crate::page::sequencer::PageMarks;
use crate::phase::hooks::ContentKind;
use crate::phase::state::ScanLimit;
use crate::types::errors::ScanError;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, MarkIndex, PageIndex};
use crate::types::operand::Operand;

/// Job-wide state a page scan reads and updates.
pub struct ScanContext<'a> {
    pub store: &'a mut ScanNodeStore,
    pub occurrences: &'a mut OccurrenceIndex,
    pub hashing: &'a mut HashContext,
    pub limit: &'a mut ScanLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    Continue,
    /// The page uses something that can never be cached; give up the scan.
    Unsupported,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: ContentKind,
    parent: Option<MarkIndex>,
}

/// Scanning pass over one page: hashes every operator, records a mark per
/// marking operator and tracks atomic regions.
pub struct PageScanner {
    page: PageMarks,
    resolver: Arc<dyn ResourceResolver>,
    gstate: GraphicsDigest,
    regions: AtomicRegionTracker,
    frames: Vec<Frame>,
    /// Mark of the operator between its before and after hooks.
    pending: Option<MarkIndex>,
    glyph_depth: u32,
    significant_area: f64,
    malformed: u32,
}

impl PageScanner {
    pub fn new(index: PageIndex, resolver: Arc<dyn ResourceResolver>, config: &RetainConfig) -> Self {
        PageScanner {
            page: PageMarks::new(index, config.max_marks_per_page),
            resolver,
            gstate: GraphicsDigest::new(),
            regions: AtomicRegionTracker::new(),
            frames: Vec::new(),
            pending: None,
            glyph_depth: 0,
            significant_area: config.significant_area,
            malformed: 0,
        }
    }

    pub fn index(&self) -> PageIndex {
        self.page.index()
    }

    pub fn marks(&self) -> &PageMarks {
        &self.page
    }

    pub fn operator(
        &mut self,
        ctx: &mut ScanContext<'_>,
        op: &str,
        operands: &[Operand],
    ) -> Result<ScanStep, ScanError> {
        let class = classify(op);
        if self.glyph_depth > 0 {
            return Ok(ScanStep::Continue);
        }
        if class.is_marking() {
            return self.record_mark(ctx, class, op, operands);
        }

        let resolver = Arc::clone(&self.resolver);
        let mut digest = || ctx.hashing.hash_operator(resolver.as_ref(), op, operands);
        match class {
            OpClass::PostScript => return Ok(ScanStep::Unsupported),
            OpClass::Save => self.gstate.save(),
            OpClass::Restore => {
                if !self.gstate.restore() {
                    warn!(page = self.index(), "unbalanced restore");
                }
            }
            OpClass::Ctm => self.gstate.chain(Slot::Ctm, digest().0),
            OpClass::FillColor | OpClass::StrokeColor => {
                let (hash, facts) = digest();
                let slot = if class == OpClass::FillColor {
                    Slot::FillColor
                } else {
                    Slot::StrokeColor
                };
                // Colour-space and whole-colour operators start over.
                if matches!(op, "cs" | "CS" | "g" | "G" | "rg" | "RG" | "k" | "K") {
                    self.gstate.set(slot, hash);
                } else {
                    self.gstate.chain(slot, hash);
                }
                if class == OpClass::FillColor {
                    self.gstate.set_pattern_fill(facts.is_pattern);
                }
                if facts.unsupported {
                    return Ok(ScanStep::Unsupported);
                }
            }
            OpClass::LineStyle => self.gstate.chain(Slot::LineStyle, digest().0),
            OpClass::ExtGState => {
                let (hash, facts) = digest();
                self.gstate.chain(Slot::ExtGState, hash);
                self.gstate.apply_compositing(facts.compositing);
            }
            OpClass::BeginText => {
                self.gstate.begin_text();
                self.regions.enter(self.page.next_index());
            }
            OpClass::EndText => {
                if !self.regions.exit(self.page.next_index()) {
                    warn!(page = self.index(), "end of text without a matching begin");
                }
            }
            OpClass::TextState => self.gstate.chain(Slot::TextState, digest().0),
            OpClass::TextFont => {
                let (hash, facts) = digest();
                self.gstate.set(Slot::Font, hash);
                if facts.unsupported {
                    return Ok(ScanStep::Unsupported);
                }
            }
            OpClass::TextPosition => {
                let hash = digest().0;
                if op == "Tm" {
                    self.gstate.set(Slot::TextPosition, hash);
                } else {
                    self.gstate.chain(Slot::TextPosition, hash);
                }
            }
            OpClass::PathConstruct => self.gstate.extend_path(digest().0),
            OpClass::PathEnd => {
                self.gstate.take_path();
            }
            OpClass::Clip => self.gstate.request_clip(),
            OpClass::MarkedContent
            | OpClass::Compat
            | OpClass::Type3Glyph
            | OpClass::Other => {}
            OpClass::ShowText
            | OpClass::PathPaint
            | OpClass::XObject
            | OpClass::Shading
            | OpClass::InlineImage => {}
        }
        Ok(ScanStep::Continue)
    }

    fn record_mark(
        &mut self,
        ctx: &mut ScanContext<'_>,
        class: OpClass,
        op: &str,
        operands: &[Operand],
    ) -> Result<ScanStep, ScanError> {
        let Some(dependency) = class.dependency() else {
            return Ok(ScanStep::Continue);
        };
        let (op_digest, facts) = ctx.hashing.hash_operator(self.resolver.as_ref(), op, operands);
        if facts.unsupported {
            return Ok(ScanStep::Unsupported);
        }
        let op_digest = match class {
            OpClass::PathPaint => {
                let mut w = DigestWriter::new("retain/paint");
                w.hash(&op_digest).hash(&self.gstate.current_path());
                w.finish()
            }
            _ => op_digest,
        };
        let mark_digest = self.gstate.mark_digest(dependency, op_digest);
        match class {
            OpClass::PathPaint => {
                self.gstate.take_path();
            }
            OpClass::ShowText => self.gstate.advance_text(op_digest),
            _ => {}
        }

        let index = self.page.next_index();
        let kind = mark_kind(class, &facts);
        let hash = if facts.cacheable() {
            mark_digest
        } else {
            self.malformed += 1;
            unique_digest(mark_digest, self.index(), index)
        };
        let pattern = class == OpClass::PathPaint && self.gstate.pattern_fill();
        let flags = NodeFlags {
            form_placeholder: kind.is_placeholder(),
            explicit_reference: facts.explicit_reference,
            composited: self.gstate.composited() || facts.transparency,
            pattern: pattern || facts.is_pattern,
            significant: facts.large_image
                || matches!(kind, MarkKind::Image | MarkKind::Shading | MarkKind::InlineImage),
        };

        self.page.reserve_one()?;
        let (claim, _) = ctx.store.lookup_or_create(
            hash,
            NodeSeed {
                bbox: BBox::EMPTY,
                flags,
            },
        )?;
        let recorded = self.page.record(
            claim,
            MarkAttrs {
                kind,
                depth: self.frames.len().min(u16::MAX as usize) as u16,
                inline_len: operands.iter().map(Operand::inline_len).sum::<usize>() as u32,
                composited: flags.composited,
            },
        );
        self.note_sighting(ctx, hash);
        self.pending = Some(recorded);
        Ok(ScanStep::Continue)
    }

    fn note_sighting(&self, ctx: &mut ScanContext<'_>, hash: ContentHash) {
        let page = self.index();
        let sighting = ctx.store.note_page(hash, page, ctx.occurrences);
        if sighting.shared {
            ctx.limit.note_shared(page, sighting.sole_previous);
        }
    }

    /// Extent painted by the operator whose before hook ran last at this level.
    pub fn painted(&mut self, ctx: &mut ScanContext<'_>, painted: Option<BBox>) -> Result<(), ScanError> {
        if self.glyph_depth > 0 {
            return Ok(());
        }
        let Some(index) = self.pending.take() else {
            return Ok(());
        };
        let Some(mark) = self.page.mark(index) else {
            return Ok(());
        };
        let (node, kind) = (mark.node, mark.kind);

        let bbox = match painted {
            Some(bbox) => bbox,
            // Placeholders already carry the union of their nested marks.
            None if kind.is_placeholder() => return Ok(()),
            None => BBox::UNBOUNDED,
        };
        if bbox.is_empty() {
            if kind.is_placeholder() {
                return Ok(());
            }
            let (sentinel, _) = ctx.store.lookup_or_create(ContentHash::NOOP, NodeSeed::default())?;
            if let Some(previous) = self.page.rebind(index, sentinel) {
                ctx.store.release(previous);
            }
            return Ok(());
        }

        if kind.is_placeholder() {
            self.page.widen(index, bbox);
        } else {
            self.page.set_painted(index, bbox);
        }
        ctx.store.widen_bbox(node, bbox);
        if bbox.area() >= self.significant_area {
            ctx.store.add_flags(
                node,
                NodeFlags {
                    significant: true,
                    ..NodeFlags::default()
                },
            );
        }
        Ok(())
    }

    pub fn enter_content(&mut self, kind: ContentKind) {
        let parent = self.pending.take();
        self.frames.push(Frame { kind, parent });
        match kind {
            ContentKind::Glyph => self.glyph_depth += 1,
            ContentKind::Form | ContentKind::Pattern => {
                self.gstate.save();
                self.regions
                    .enter(parent.unwrap_or_else(|| self.page.next_index()));
            }
        }
    }

    pub fn exit_content(&mut self) {
        let Some(frame) = self.frames.pop() else {
            warn!(page = self.index(), "content exit without a matching enter");
            return;
        };
        self.close_frame(frame);
    }

    fn close_frame(&mut self, frame: Frame) {
        let next = self.page.next_index();
        match frame.kind {
            ContentKind::Glyph => self.glyph_depth = self.glyph_depth.saturating_sub(1),
            ContentKind::Form | ContentKind::Pattern => {
                self.gstate.restore();
                self.regions.exit(next);
                if let Some(parent) = frame.parent {
                    self.page.set_extent_end(parent, next);
                    let nested = self.page.marks()[(parent + 1) as usize..next as usize]
                        .iter()
                        .fold(BBox::EMPTY, |acc, mark| acc.union(&mark.bbox));
                    self.page.widen(parent, nested);
                }
            }
        }
        self.pending = frame.parent;
    }

    /// Close the page: settle open regions, flag atomic ranges and make sure
    /// at least one mark exists.
    pub fn finish(mut self, ctx: &mut ScanContext<'_>) -> Result<PageMarks, ScanError> {
        if !self.frames.is_empty() {
            warn!(page = self.index(), open = self.frames.len(), "content left open at page end");
            while let Some(frame) = self.frames.pop() {
                self.close_frame(frame);
            }
        }
        self.regions.finish(self.page.next_index());
        self.regions.add_composited_runs(self.page.marks());
        let regions = self.regions.apply(self.page.marks_mut());

        match self.page.ensure_not_empty(ctx.store) {
            Ok(true) => self.note_sighting(ctx, ContentHash::EMPTY_PAGE),
            Ok(false) => {}
            Err(err) => {
                self.page.release(ctx.store);
                return Err(err);
            }
        }
        let page = self.index();
        ctx.limit.page_scanned(page);
        debug!(
            page,
            marks = self.page.mark_count(),
            regions = regions.len(),
            malformed = self.malformed,
            unbalanced = self.regions.unbalanced(),
            "scanned page"
        );
        Ok(self.page)
    }

    /// Drop the page without finalizing it.
    pub fn discard(self, store: &mut ScanNodeStore) -> usize {
        self.page.release(store)
    }
}

/// Pre-scan: hash the named resources an operator uses, nothing else.
pub fn prescan_operands(
    hashing: &mut HashContext,
    resolver: &dyn ResourceResolver,
    operands: &[Operand],
) -> usize {
    let mut hashed = 0;
    for operand in operands {
        if let Operand::Resource(kind, name) = operand {
            hashing.hash_resource(resolver, *kind, name);
            hashed += 1;
        }
    }
    hashed
}

fn mark_kind(class: OpClass, facts: &HashFacts) -> MarkKind {
    match class {
        OpClass::ShowText => MarkKind::Text,
        OpClass::XObject if facts.is_form => MarkKind::Form,
        OpClass::XObject => MarkKind::Image,
        OpClass::Shading => MarkKind::Shading,
        OpClass::InlineImage => MarkKind::InlineImage,
        _ => MarkKind::Path,
    }
}

/// Digest that no other mark can share, for marks whose input was malformed.
fn unique_digest(mark: ContentHash, page: PageIndex, index: MarkIndex) -> ContentHash {
    let mut w = DigestWriter::new("retain/unique");
    w.tag(tag::MALFORMED).hash(&mark).u32(page).u32(index);
    w.finish()
}
