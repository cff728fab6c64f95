use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phase::coordinator::CompletionCoordinator;
use crate::protocol::events::PageDefinition;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, PageIndex};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Cache store refused connection to {cache_id}/{setup_id}")]
    ConnectRefused { cache_id: String, setup_id: String },
    #[error("Not connected to a cache store")]
    NotConnected,
    #[error("Unknown cache connection: {0}")]
    UnknownConnection(u64),
    #[error("Cache store error: {0}")]
    Store(String),
}

/// Outcome of an event the store may not care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Handled,
    /// Nobody consumed the event. Not an error.
    Unhandled,
}

/// Opaque handle to a raster produced by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RasterHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: u64,
    pub cache_id: String,
    pub setup_id: String,
}

/// The external cache store.
///
/// Stores are shared with render-worker threads, which report page
/// completion through the coordinator handed over at `connect`.
pub trait CacheStore: Send + Sync {
    fn connect(
        &self,
        cache_id: &str,
        setup_id: &str,
        completion: Arc<CompletionCoordinator>,
    ) -> Result<Connection, ProtocolError>;

    fn disconnect(&self, connection: &Connection) -> Result<(), ProtocolError>;

    fn page_define(
        &self,
        connection: &Connection,
        pages: &[PageDefinition],
    ) -> Result<EventStatus, ProtocolError>;

    fn page_ready(&self, connection: &Connection, page: PageIndex)
        -> Result<EventStatus, ProtocolError>;

    fn element_define(
        &self,
        connection: &Connection,
        id: ContentHash,
        bbox: BBox,
    ) -> Result<EventStatus, ProtocolError>;

    /// Whether a raster for `id` is already held.
    fn element_query(&self, connection: &Connection, id: ContentHash) -> Result<bool, ProtocolError>;

    fn element_lock(&self, _connection: &Connection, _id: ContentHash) -> Result<EventStatus, ProtocolError> {
        Ok(EventStatus::Unhandled)
    }

    fn element_unlock(&self, _connection: &Connection, _id: ContentHash) -> Result<EventStatus, ProtocolError> {
        Ok(EventStatus::Unhandled)
    }

    fn element_pending(&self, _connection: &Connection, _id: ContentHash) -> Result<EventStatus, ProtocolError> {
        Ok(EventStatus::Unhandled)
    }

    fn element_update_raster(
        &self,
        connection: &Connection,
        id: ContentHash,
        raster: RasterHandle,
        size: usize,
    ) -> Result<EventStatus, ProtocolError>;

    /// Adjust how many uses of `id` are expected; `raise` asks the store to
    /// keep the element longer.
    fn element_update_hits(
        &self,
        _connection: &Connection,
        _id: ContentHash,
        _delta: i64,
        _raise: bool,
    ) -> Result<EventStatus, ProtocolError> {
        Ok(EventStatus::Unhandled)
    }
}
