use crate::hash::digest::{tag, DigestWriter};
use crate::hash::hasher::Compositing;
use crate::types::identifiers::ContentHash;

/// Independent pieces of graphics state a mark's appearance can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Ctm,
    Clip,
    FillColor,
    StrokeColor,
    LineStyle,
    ExtGState,
    Font,
    TextState,
    TextPosition,
    Misc,
}

const SLOT_COUNT: usize = 10;

impl Slot {
    fn index(self) -> usize {
        self as usize
    }
}

/// Which slots feed the digest of a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Painted paths.
    Path,
    /// Text-showing operators.
    Text,
    /// Placed objects: images, forms, shadings.
    Placed,
}

impl Dependency {
    fn slots(self) -> &'static [Slot] {
        match self {
            Dependency::Path => &[
                Slot::Ctm,
                Slot::Clip,
                Slot::FillColor,
                Slot::StrokeColor,
                Slot::LineStyle,
                Slot::ExtGState,
                Slot::Misc,
            ],
            Dependency::Text => &[
                Slot::Ctm,
                Slot::Clip,
                Slot::FillColor,
                Slot::StrokeColor,
                Slot::LineStyle,
                Slot::ExtGState,
                Slot::Font,
                Slot::TextState,
                Slot::TextPosition,
                Slot::Misc,
            ],
            Dependency::Placed => &[
                Slot::Ctm,
                Slot::Clip,
                Slot::FillColor,
                Slot::ExtGState,
                Slot::Misc,
            ],
        }
    }
}

#[derive(Debug, Clone)]
struct State {
    slots: [ContentHash; SLOT_COUNT],
    compositing: Compositing,
    pattern_fill: bool,
}

/// Per-page digest of the graphics state, saved and restored with `q`/`Q`.
///
/// Construct a fresh one for every page.
#[derive(Debug, Clone)]
pub struct GraphicsDigest {
    initial: [ContentHash; SLOT_COUNT],
    current: State,
    saved: Vec<State>,
    path: Option<ContentHash>,
    clip_pending: bool,
}

impl GraphicsDigest {
    pub fn new() -> Self {
        let mut initial = [ContentHash::NOOP; SLOT_COUNT];
        for (index, slot) in initial.iter_mut().enumerate() {
            let mut w = DigestWriter::new("retain/slot-initial");
            w.u32(index as u32);
            *slot = w.finish();
        }
        GraphicsDigest {
            initial,
            current: State {
                slots: initial,
                compositing: Compositing::default(),
                pattern_fill: false,
            },
            saved: Vec::new(),
            path: None,
            clip_pending: false,
        }
    }

    pub fn save(&mut self) {
        self.saved.push(self.current.clone());
    }

    /// Returns false for an unbalanced restore, which leaves the state alone.
    pub fn restore(&mut self) -> bool {
        match self.saved.pop() {
            Some(state) => {
                self.current = state;
                true
            }
            None => false,
        }
    }

    pub fn slot(&self, slot: Slot) -> ContentHash {
        self.current.slots[slot.index()]
    }

    /// Replace a slot, e.g. `rg` replaces the fill colour.
    pub fn set(&mut self, slot: Slot, value: ContentHash) {
        self.current.slots[slot.index()] = value;
    }

    /// Fold into a slot, e.g. `cm` concatenates onto the CTM.
    pub fn chain(&mut self, slot: Slot, value: ContentHash) {
        let mut w = DigestWriter::new("retain/slot-chain");
        w.hash(&self.current.slots[slot.index()]).hash(&value);
        self.current.slots[slot.index()] = w.finish();
    }

    /// Marks drawn now are blended with what lies beneath them.
    pub fn composited(&self) -> bool {
        self.current.compositing.translucent()
    }

    /// `gs`: the dictionary's transparency parameters replace the ones it sets.
    pub fn apply_compositing(&mut self, params: Compositing) {
        self.current.compositing.overlay(params);
    }

    pub fn pattern_fill(&self) -> bool {
        self.current.pattern_fill
    }

    pub fn set_pattern_fill(&mut self, pattern: bool) {
        self.current.pattern_fill = pattern;
    }

    /// `BT` resets the text matrices.
    pub fn begin_text(&mut self) {
        let index = Slot::TextPosition.index();
        self.current.slots[index] = self.initial[index];
    }

    /// Text-showing operators move the text position as a side effect.
    pub fn advance_text(&mut self, shown: ContentHash) {
        self.chain(Slot::TextPosition, shown);
    }

    pub fn extend_path(&mut self, segment: ContentHash) {
        let mut w = DigestWriter::new("retain/path");
        if let Some(prev) = self.path {
            w.hash(&prev);
        }
        w.hash(&segment);
        self.path = Some(w.finish());
    }

    /// Digest of the path under construction, without consuming it.
    pub fn current_path(&self) -> ContentHash {
        self.path.unwrap_or(ContentHash::NOOP)
    }

    /// `W`/`W*`: the current path becomes a clip once it is consumed.
    pub fn request_clip(&mut self) {
        self.clip_pending = true;
    }

    /// Consume the current path for a painting operator or `n`. A pending
    /// clip is applied afterwards, so it never affects the paint that ends it.
    pub fn take_path(&mut self) -> ContentHash {
        let path = self.path.take().unwrap_or(ContentHash::NOOP);
        if std::mem::take(&mut self.clip_pending) {
            self.chain(Slot::Clip, path);
        }
        path
    }

    /// Digest of a mark: its own operator digest plus the slots it depends on.
    pub fn mark_digest(&self, dependency: Dependency, op_digest: ContentHash) -> ContentHash {
        let mut w = DigestWriter::new("retain/mark");
        w.hash(&op_digest);
        for slot in dependency.slots() {
            w.tag(tag::SLOT).u8(slot.index() as u8).hash(&self.slot(*slot));
        }
        w.finish()
    }
}

impl Default for GraphicsDigest {
    fn default() -> Self {
        Self::new()
    }
}
