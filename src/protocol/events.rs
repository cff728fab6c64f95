use serde::{Deserialize, Serialize};

use crate::protocol::store::RasterHandle;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, PageIndex};

/// Element layout of one page, as announced to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDefinition {
    pub page: PageIndex,
    pub element_count: u32,
    /// Bottom to top.
    pub elements: Vec<ContentHash>,
}

/// One protocol event, as recorded by stores that keep a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    Connect {
        connection: u64,
        cache_id: String,
        setup_id: String,
    },
    Disconnect {
        connection: u64,
    },
    PageDefine {
        connection: u64,
        pages: Vec<PageDefinition>,
    },
    PageReady {
        connection: u64,
        page: PageIndex,
    },
    PageComplete {
        connection: u64,
        page: PageIndex,
    },
    ElementDefine {
        connection: u64,
        id: ContentHash,
        bbox: BBox,
    },
    ElementQuery {
        connection: u64,
        id: ContentHash,
        found: bool,
    },
    ElementLock {
        connection: u64,
        id: ContentHash,
    },
    ElementUnlock {
        connection: u64,
        id: ContentHash,
    },
    ElementPending {
        connection: u64,
        id: ContentHash,
    },
    ElementUpdateRaster {
        connection: u64,
        id: ContentHash,
        raster: RasterHandle,
        size: usize,
    },
    ElementUpdateHits {
        connection: u64,
        id: ContentHash,
        delta: i64,
        raise: bool,
    },
}

impl CacheEvent {
    /// The `event` tag this variant serializes under.
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Connect { .. } => "connect",
            CacheEvent::Disconnect { .. } => "disconnect",
            CacheEvent::PageDefine { .. } => "page_define",
            CacheEvent::PageReady { .. } => "page_ready",
            CacheEvent::PageComplete { .. } => "page_complete",
            CacheEvent::ElementDefine { .. } => "element_define",
            CacheEvent::ElementQuery { .. } => "element_query",
            CacheEvent::ElementLock { .. } => "element_lock",
            CacheEvent::ElementUnlock { .. } => "element_unlock",
            CacheEvent::ElementPending { .. } => "element_pending",
            CacheEvent::ElementUpdateRaster { .. } => "element_update_raster",
            CacheEvent::ElementUpdateHits { .. } => "element_update_hits",
        }
    }
}
