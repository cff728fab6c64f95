pub mod errors;
pub mod geometry;
pub mod identifiers;
pub mod operand;

pub use errors::ScanError;
pub use geometry::BBox;
pub use identifiers::{ContentHash, IdentifierError, MarkIndex, PageIndex, DIGEST_LEN};
pub use operand::{ObjRef, Operand, ResourceKind};
