pub mod builder;
pub mod legality;

pub use builder::{flagged_regions, supernode_digest, BuildStats, SupernodeBuilder};
pub use legality::{can_reorder, mergeable, Candidate};
