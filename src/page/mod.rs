pub mod atomic;
pub mod mark;
pub mod sequencer;
pub mod zorder;

pub use atomic::AtomicRegionTracker;
pub use mark::{Mark, MarkAttrs, MarkKind};
pub use sequencer::PageMarks;
pub use zorder::{Link, LinkId, ZOrder};
