use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::RetainConfig;
use crate::types::identifiers::PageIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Normal,
    /// Abandon the current pass cheaply.
    Skipping,
    /// Resource hashing only.
    PreScanning,
    Scanning,
    Storing,
    Exporting,
    Replaying,
}

impl Phase {
    pub fn can_transition(self, to: Phase) -> bool {
        use Phase::*;
        if self == to {
            return true;
        }
        match self {
            Normal => true,
            PreScanning => matches!(to, Scanning | Skipping | Normal),
            Scanning => matches!(to, Skipping | Storing | Exporting | Replaying | Normal),
            Skipping => to == Normal,
            Storing | Exporting | Replaying => {
                matches!(to, Storing | Exporting | Replaying | Normal)
            }
        }
    }

    /// Phases in which marks are gated by an omission pattern.
    pub fn is_output(self) -> bool {
        matches!(self, Phase::Storing | Phase::Exporting | Phase::Replaying)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
}

#[derive(Debug)]
pub struct PhaseMachine {
    current: Phase,
    transitions: u64,
}

impl PhaseMachine {
    pub fn new() -> Self {
        PhaseMachine {
            current: Phase::Normal,
            transitions: 0,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn transition(&mut self, to: Phase) -> Result<Phase, PhaseError> {
        let from = self.current;
        if !from.can_transition(to) {
            return Err(PhaseError::InvalidTransition { from, to });
        }
        if from != to {
            debug!(?from, ?to, "phase transition");
            self.current = to;
            self.transitions += 1;
        }
        Ok(from)
    }

    /// Return to NORMAL from anywhere. Used by teardown.
    pub fn reset(&mut self) {
        if self.current != Phase::Normal {
            debug!(from = ?self.current, "phase reset");
            self.current = Phase::Normal;
            self.transitions += 1;
        }
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks how many scanned pages had nothing in common with any other page.
///
/// A page counts as unique until some node on it turns up on another page.
#[derive(Debug, Clone)]
pub struct ScanLimit {
    percent: u32,
    min_pages: u32,
    scanned: BTreeSet<PageIndex>,
    unique: BTreeSet<PageIndex>,
    shared: BTreeMap<PageIndex, bool>,
}

impl ScanLimit {
    pub fn new(percent: u32, min_pages: u32) -> Self {
        ScanLimit {
            percent,
            min_pages,
            scanned: BTreeSet::new(),
            unique: BTreeSet::new(),
            shared: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &RetainConfig) -> Self {
        Self::new(config.scan_limit_percent, config.scan_limit_min_pages)
    }

    pub fn disabled() -> Self {
        Self::new(100, 0)
    }

    /// Record that `page` shares content with an earlier page, and that the
    /// earlier page (if it was the node's only page) is no longer unique.
    pub fn note_shared(&mut self, page: PageIndex, previous: Option<PageIndex>) {
        self.shared.insert(page, true);
        if let Some(previous) = previous {
            self.unique.remove(&previous);
            self.shared.insert(previous, true);
        }
    }

    /// Close out a scanned page.
    pub fn page_scanned(&mut self, page: PageIndex) {
        self.scanned.insert(page);
        if !self.shared.get(&page).copied().unwrap_or(false) {
            self.unique.insert(page);
        }
    }

    pub fn scanned(&self) -> u32 {
        self.scanned.len() as u32
    }

    pub fn unique(&self) -> u32 {
        self.unique.len() as u32
    }

    pub fn exceeded(&self) -> bool {
        let scanned = self.scanned();
        self.percent < 100
            && scanned >= self.min_pages.max(1)
            && u64::from(self.unique()) * 100 > u64::from(self.percent) * u64::from(scanned)
    }

    pub fn reset(&mut self) {
        self.scanned.clear();
        self.unique.clear();
        self.shared.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipping_only_returns_to_normal() {
        let mut machine = PhaseMachine::new();
        machine.transition(Phase::Scanning).unwrap();
        machine.transition(Phase::Skipping).unwrap();
        assert_eq!(
            machine.transition(Phase::Storing),
            Err(PhaseError::InvalidTransition {
                from: Phase::Skipping,
                to: Phase::Storing
            })
        );
        machine.transition(Phase::Normal).unwrap();
        assert_eq!(machine.transitions(), 3);
    }

    #[test]
    fn output_phases_interchange() {
        assert!(Phase::Storing.can_transition(Phase::Replaying));
        assert!(Phase::Replaying.can_transition(Phase::Exporting));
        assert!(!Phase::Replaying.can_transition(Phase::Scanning));
        assert!(!Phase::PreScanning.can_transition(Phase::Storing));
    }

    #[test]
    fn limit_waits_for_minimum_pages() {
        let mut limit = ScanLimit::new(50, 2);
        limit.page_scanned(0);
        assert!(!limit.exceeded());
        limit.note_shared(1, Some(0));
        limit.page_scanned(1);
        assert_eq!(limit.unique(), 0);
        limit.page_scanned(2);
        limit.page_scanned(3);
        assert!(!limit.exceeded());
        limit.page_scanned(4);
        assert!(limit.exceeded());
    }
}
