use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::identifiers::PageIndex;

/// Summary of one scanned chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub first_page: PageIndex,
    /// Exclusive.
    pub end_page: PageIndex,
    pub pages_scanned: u32,
    pub unique_pages: u32,
    /// The scan was given up; pages render without caching.
    pub abandoned: bool,
    pub elements: usize,
    pub cacheable_elements: usize,
    pub replayed_elements: usize,
    pub supernodes_built: usize,
    pub live_nodes: usize,
    pub created_at: DateTime<Utc>, // informational only
}
