pub mod digest;
pub mod gstate;
pub mod hasher;
pub mod resolver;

pub use digest::DigestWriter;
pub use gstate::{Dependency, GraphicsDigest, Slot};
pub use hasher::{Compositing, HashContext, HashFacts, MemoStats};
pub use resolver::{MapResolver, ResourceResolver};
