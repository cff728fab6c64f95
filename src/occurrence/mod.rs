pub mod bitset;
pub mod index;

pub use bitset::OmissionSet;
pub use index::OccurrenceIndex;
