use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::phase::coordinator::CompletionCoordinator;
use crate::protocol::events::{CacheEvent, PageDefinition};
use crate::protocol::store::{CacheStore, Connection, EventStatus, ProtocolError, RasterHandle};
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, PageIndex};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredElement {
    pub bbox: BBox,
    pub raster: Option<(RasterHandle, usize)>,
    pub hits: i64,
    pub locked: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_connection: u64,
    connections: HashMap<u64, Arc<CompletionCoordinator>>,
    elements: BTreeMap<ContentHash, StoredElement>,
    events: Vec<CacheEvent>,
}

impl Inner {
    fn check(&self, connection: &Connection) -> Result<(), ProtocolError> {
        if self.connections.contains_key(&connection.id) {
            Ok(())
        } else {
            Err(ProtocolError::UnknownConnection(connection.id))
        }
    }

    fn element(&mut self, id: ContentHash) -> &mut StoredElement {
        self.elements.entry(id).or_insert(StoredElement {
            bbox: BBox::EMPTY,
            raster: None,
            hits: 0,
            locked: false,
        })
    }
}

/// In-process cache store that keeps every raster and logs every event.
///
/// With auto-completion on, `page_ready` completes the page immediately;
/// otherwise a render worker calls [`MemoryCacheStore::complete_page`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    inner: Mutex<Inner>,
    auto_complete: bool,
    refuse: bool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    /// A store that refuses every connection.
    pub fn refusing() -> Self {
        MemoryCacheStore {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.inner.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.inner.lock().events)
    }

    pub fn element(&self, id: &ContentHash) -> Option<StoredElement> {
        self.inner.lock().elements.get(id).cloned()
    }

    pub fn element_count(&self) -> usize {
        self.inner.lock().elements.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Seed a raster, as if an earlier job had stored it.
    pub fn insert_raster(&self, id: ContentHash, bbox: BBox, raster: RasterHandle, size: usize) {
        let mut inner = self.inner.lock();
        let element = inner.element(id);
        element.bbox = bbox;
        element.raster = Some((raster, size));
    }

    /// Report that the output for `page` has been delivered.
    pub fn complete_page(&self, connection: u64, page: PageIndex) -> Result<(), ProtocolError> {
        let coordinator = {
            let mut inner = self.inner.lock();
            let coordinator = inner
                .connections
                .get(&connection)
                .cloned()
                .ok_or(ProtocolError::UnknownConnection(connection))?;
            inner.events.push(CacheEvent::PageComplete { connection, page });
            coordinator
        };
        coordinator.page_complete(page);
        Ok(())
    }

    fn record(
        &self,
        connection: &Connection,
        event: CacheEvent,
    ) -> Result<EventStatus, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        inner.events.push(event);
        Ok(EventStatus::Handled)
    }
}

impl CacheStore for MemoryCacheStore {
    fn connect(
        &self,
        cache_id: &str,
        setup_id: &str,
        completion: Arc<CompletionCoordinator>,
    ) -> Result<Connection, ProtocolError> {
        if self.refuse {
            return Err(ProtocolError::ConnectRefused {
                cache_id: cache_id.to_string(),
                setup_id: setup_id.to_string(),
            });
        }
        let mut inner = self.inner.lock();
        inner.next_connection += 1;
        let id = inner.next_connection;
        inner.connections.insert(id, completion);
        inner.events.push(CacheEvent::Connect {
            connection: id,
            cache_id: cache_id.to_string(),
            setup_id: setup_id.to_string(),
        });
        debug!(connection = id, cache_id, setup_id, "cache store connected");
        Ok(Connection {
            id,
            cache_id: cache_id.to_string(),
            setup_id: setup_id.to_string(),
        })
    }

    fn disconnect(&self, connection: &Connection) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock();
        if inner.connections.remove(&connection.id).is_none() {
            return Err(ProtocolError::UnknownConnection(connection.id));
        }
        inner.events.push(CacheEvent::Disconnect {
            connection: connection.id,
        });
        Ok(())
    }

    fn page_define(
        &self,
        connection: &Connection,
        pages: &[PageDefinition],
    ) -> Result<EventStatus, ProtocolError> {
        self.record(
            connection,
            CacheEvent::PageDefine {
                connection: connection.id,
                pages: pages.to_vec(),
            },
        )
    }

    fn page_ready(
        &self,
        connection: &Connection,
        page: PageIndex,
    ) -> Result<EventStatus, ProtocolError> {
        let status = self.record(
            connection,
            CacheEvent::PageReady {
                connection: connection.id,
                page,
            },
        )?;
        if self.auto_complete {
            self.complete_page(connection.id, page)?;
        }
        Ok(status)
    }

    fn element_define(
        &self,
        connection: &Connection,
        id: ContentHash,
        bbox: BBox,
    ) -> Result<EventStatus, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        let element = inner.element(id);
        element.bbox = element.bbox.union(&bbox);
        inner.events.push(CacheEvent::ElementDefine {
            connection: connection.id,
            id,
            bbox,
        });
        Ok(EventStatus::Handled)
    }

    fn element_query(&self, connection: &Connection, id: ContentHash) -> Result<bool, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        let found = inner
            .elements
            .get(&id)
            .is_some_and(|element| element.raster.is_some());
        inner.events.push(CacheEvent::ElementQuery {
            connection: connection.id,
            id,
            found,
        });
        Ok(found)
    }

    fn element_lock(&self, connection: &Connection, id: ContentHash) -> Result<EventStatus, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        inner.element(id).locked = true;
        inner.events.push(CacheEvent::ElementLock {
            connection: connection.id,
            id,
        });
        Ok(EventStatus::Handled)
    }

    fn element_unlock(&self, connection: &Connection, id: ContentHash) -> Result<EventStatus, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        inner.element(id).locked = false;
        inner.events.push(CacheEvent::ElementUnlock {
            connection: connection.id,
            id,
        });
        Ok(EventStatus::Handled)
    }

    fn element_pending(&self, connection: &Connection, id: ContentHash) -> Result<EventStatus, ProtocolError> {
        self.record(
            connection,
            CacheEvent::ElementPending {
                connection: connection.id,
                id,
            },
        )
    }

    fn element_update_raster(
        &self,
        connection: &Connection,
        id: ContentHash,
        raster: RasterHandle,
        size: usize,
    ) -> Result<EventStatus, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        inner.element(id).raster = Some((raster, size));
        inner.events.push(CacheEvent::ElementUpdateRaster {
            connection: connection.id,
            id,
            raster,
            size,
        });
        Ok(EventStatus::Handled)
    }

    fn element_update_hits(
        &self,
        connection: &Connection,
        id: ContentHash,
        delta: i64,
        raise: bool,
    ) -> Result<EventStatus, ProtocolError> {
        let mut inner = self.inner.lock();
        inner.check(connection)?;
        inner.element(id).hits += delta;
        inner.events.push(CacheEvent::ElementUpdateHits {
            connection: connection.id,
            id,
            delta,
            raise,
        });
        Ok(EventStatus::Handled)
    }
}
