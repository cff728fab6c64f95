use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::identifiers::PageIndex;

/// Shared cancellation flag, observed by bounded waits at every wake.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Registered, output not yet handed over.
    Pending,
    Ready,
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PageSlot {
    ready: bool,
    complete: bool,
    /// Completion arrived before the page was marked ready.
    complete_early: bool,
}

impl PageSlot {
    fn status(&self) -> PageStatus {
        if self.complete {
            PageStatus::Complete
        } else if self.ready {
            PageStatus::Ready
        } else {
            PageStatus::Pending
        }
    }
}

#[derive(Debug, Default)]
struct State {
    pages: BTreeMap<PageIndex, PageSlot>,
    remaining: usize,
    completed: Vec<PageIndex>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait cancelled with {pages_abandoned} page(s) outstanding")]
    Cancelled { pages_abandoned: usize },
}

/// Hand-off point between page interpretation and the asynchronous output
/// side. Pages go READY then COMPLETE; every count lives under one mutex.
#[derive(Debug)]
pub struct CompletionCoordinator {
    state: Mutex<State>,
    changed: Condvar,
    poll: Duration,
}

impl CompletionCoordinator {
    pub fn new(poll: Duration) -> Self {
        CompletionCoordinator {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            poll,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Start tracking pages whose output will be produced asynchronously.
    /// Pages already tracked are left alone.
    pub fn register_pages(&self, pages: impl IntoIterator<Item = PageIndex>) -> usize {
        let mut state = self.state.lock();
        let mut added = 0;
        for page in pages {
            if state.pages.contains_key(&page) {
                continue;
            }
            state.pages.insert(page, PageSlot::default());
            state.remaining += 1;
            added += 1;
        }
        added
    }

    pub fn page_ready(&self, page: PageIndex) {
        let mut state = self.state.lock();
        let Some(slot) = state.pages.get_mut(&page) else {
            warn!(page, "ready signalled for an unregistered page");
            return;
        };
        if slot.ready {
            return;
        }
        slot.ready = true;
        if std::mem::take(&mut slot.complete_early) {
            Self::complete_locked(&mut state, page);
            self.changed.notify_all();
        }
    }

    /// Signalled by the output side, from any thread.
    pub fn page_complete(&self, page: PageIndex) {
        let mut state = self.state.lock();
        let Some(slot) = state.pages.get_mut(&page) else {
            warn!(page, "completion signalled for an unregistered page");
            return;
        };
        if slot.complete {
            return;
        }
        if !slot.ready {
            debug!(page, "completion arrived before ready");
            slot.complete_early = true;
            return;
        }
        Self::complete_locked(&mut state, page);
        self.changed.notify_all();
    }

    fn complete_locked(state: &mut State, page: PageIndex) {
        if let Some(slot) = state.pages.get_mut(&page) {
            slot.complete = true;
            state.remaining = state.remaining.saturating_sub(1);
            state.completed.push(page);
        }
    }

    pub fn pages_remaining(&self) -> usize {
        self.state.lock().remaining
    }

    pub fn status(&self, page: PageIndex) -> Option<PageStatus> {
        self.state.lock().pages.get(&page).map(PageSlot::status)
    }

    /// Pages completed since the last call, in completion order.
    pub fn drain_completed(&self) -> Vec<PageIndex> {
        std::mem::take(&mut self.state.lock().completed)
    }

    /// Block until nothing is outstanding. Wakes every poll interval to check
    /// `cancel`; on cancellation every page is abandoned.
    pub fn wait_idle(&self, cancel: &CancelToken) -> Result<(), WaitError> {
        let mut state = self.state.lock();
        while state.remaining > 0 {
            if cancel.is_cancelled() {
                let pages_abandoned = Self::abandon_locked(&mut state);
                self.changed.notify_all();
                return Err(WaitError::Cancelled { pages_abandoned });
            }
            self.changed.wait_for(&mut state, self.poll);
        }
        Ok(())
    }

    /// Give up on every outstanding page. Returns how many were dropped.
    pub fn abandon(&self) -> usize {
        let abandoned = Self::abandon_locked(&mut self.state.lock());
        self.changed.notify_all();
        abandoned
    }

    fn abandon_locked(state: &mut State) -> usize {
        let abandoned = state.remaining;
        for slot in state.pages.values_mut() {
            slot.complete = true;
            slot.complete_early = false;
        }
        state.remaining = 0;
        if abandoned > 0 {
            warn!(abandoned, "abandoned outstanding pages");
        }
        abandoned
    }

    /// Forget completed pages so their indices can be reused by a new chunk.
    pub fn forget_completed(&self) {
        self.state.lock().pages.retain(|_, slot| !slot.complete);
    }

    pub fn ticket(self: &Arc<Self>, page: PageIndex) -> CompletionTicket {
        CompletionTicket {
            coordinator: Arc::clone(self),
            page,
        }
    }
}

/// Resolves once one page is complete.
#[derive(Debug, Clone)]
pub struct CompletionTicket {
    coordinator: Arc<CompletionCoordinator>,
    page: PageIndex,
}

impl CompletionTicket {
    pub fn page(&self) -> PageIndex {
        self.page
    }

    pub fn is_complete(&self) -> bool {
        // Forgotten pages were complete.
        self.coordinator
            .status(self.page)
            .map_or(true, |status| status == PageStatus::Complete)
    }

    pub fn wait(&self, cancel: &CancelToken) -> Result<(), WaitError> {
        let coordinator = &self.coordinator;
        let mut state = coordinator.state.lock();
        loop {
            match state.pages.get(&self.page) {
                Some(slot) if !slot.complete => {}
                _ => return Ok(()),
            }
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled { pages_abandoned: 0 });
            }
            coordinator.changed.wait_for(&mut state, coordinator.poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_before_ready_is_absorbed() {
        let coordinator = CompletionCoordinator::new(Duration::from_millis(5));
        coordinator.register_pages([0, 1]);
        coordinator.page_complete(0);
        assert_eq!(coordinator.status(0), Some(PageStatus::Pending));
        assert_eq!(coordinator.pages_remaining(), 2);
        coordinator.page_ready(0);
        assert_eq!(coordinator.status(0), Some(PageStatus::Complete));
        assert_eq!(coordinator.pages_remaining(), 1);
        assert_eq!(coordinator.drain_completed(), vec![0]);
    }

    #[test]
    fn duplicate_signals_count_once() {
        let coordinator = CompletionCoordinator::new(Duration::from_millis(5));
        assert_eq!(coordinator.register_pages([3, 3]), 1);
        coordinator.page_ready(3);
        coordinator.page_complete(3);
        coordinator.page_complete(3);
        assert_eq!(coordinator.pages_remaining(), 0);
        assert!(coordinator.wait_idle(&CancelToken::new()).is_ok());
    }
}
