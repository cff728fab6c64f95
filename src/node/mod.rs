pub mod node;
pub mod store;

pub use node::{NodeFlags, NodeSeed, ScanNode};
pub use store::{NodeClaim, ScanNodeStore, Sighting, StoreStats};
