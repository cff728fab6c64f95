pub mod events;
pub mod memory;
pub mod store;

pub use events::{CacheEvent, PageDefinition};
pub use memory::{MemoryCacheStore, StoredElement};
pub use store::{CacheStore, Connection, EventStatus, ProtocolError, RasterHandle};
