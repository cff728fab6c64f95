use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, OutputMode, RetainConfig};
use crate::engine::replay::{PagePlan, PassAction, PassGate, PassPlan, PassSummary};
use crate::engine::report::ChunkReport;
use crate::engine::scan::{prescan_operands, PageScanner, ScanContext, ScanStep};
use crate::hash::hasher::{HashContext, MemoStats};
use crate::hash::resolver::ResourceResolver;
use crate::merge::builder::{BuildStats, SupernodeBuilder};
use crate::node::store::ScanNodeStore;
use crate::occurrence::bitset::OmissionSet;
use crate::occurrence::index::OccurrenceIndex;
use crate::ops::classify;
use crate::page::sequencer::PageMarks;
use crate::phase::coordinator::{CancelToken, CompletionCoordinator, CompletionTicket, WaitError};
use crate::phase::hooks::{ContentKind, OperatorHooks, Verdict};
use crate::phase::state::{Phase, PhaseError, PhaseMachine, ScanLimit};
use crate::protocol::events::PageDefinition;
use crate::protocol::store::{CacheStore, Connection, ProtocolError, RasterHandle};
use crate::types::errors::ScanError;
use crate::types::geometry::BBox;
use crate::types::identifiers::{ContentHash, PageIndex};
use crate::types::operand::Operand;
use crate::window::finalize::{finalize_page, ClosedPage, ScanWindow};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),
    #[error("Wait error: {0}")]
    Wait(#[from] WaitError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Page {0} is not part of the current chunk")]
    UnknownPage(PageIndex),
    #[error("No page is being processed")]
    NoActivePage,
    #[error("No pass is active")]
    NoActivePass,
    #[error("Not allowed in phase {0:?}")]
    WrongPhase(Phase),
}

struct ActivePass {
    page: PageIndex,
    element: ContentHash,
    action: PassAction,
    gate: PassGate,
}

/// Drives retained-raster caching for one job.
///
/// Per chunk of pages: every page is scanned (`begin_page` .. `end_page`
/// with the interpreter calling the [`OperatorHooks`]), `finish_scan` builds
/// supernodes and closes the pages, then each page is produced pass by pass
/// following its [`PagePlan`] and handed to the store with `page_ready`.
pub struct RetainEngine {
    config: RetainConfig,
    store: Arc<dyn CacheStore>,
    coordinator: Arc<CompletionCoordinator>,
    cancel: CancelToken,
    connection: Option<Connection>,
    phase: PhaseMachine,
    limit: ScanLimit,
    nodes: ScanNodeStore,
    occurrences: OccurrenceIndex,
    hashing: HashContext,
    window: ScanWindow,
    scanner: Option<PageScanner>,
    prescan_resolver: Option<Arc<dyn ResourceResolver>>,
    active_page: Option<PageIndex>,
    chunk: Option<Range<PageIndex>>,
    closed: BTreeMap<PageIndex, ClosedPage>,
    plans: BTreeMap<PageIndex, PagePlan>,
    pass: Option<ActivePass>,
    build: BuildStats,
    abandoned: bool,
    shut_down: bool,
}

impl RetainEngine {
    pub fn new(config: RetainConfig, store: Arc<dyn CacheStore>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(RetainEngine {
            coordinator: Arc::new(CompletionCoordinator::new(config.poll_interval())),
            cancel: CancelToken::new(),
            connection: None,
            phase: PhaseMachine::new(),
            limit: ScanLimit::from_config(&config),
            nodes: ScanNodeStore::new(config.max_scan_nodes),
            occurrences: OccurrenceIndex::new(),
            hashing: HashContext::new(&config),
            window: ScanWindow::new(config.window_pages.map(|pages| pages as usize)),
            scanner: None,
            prescan_resolver: None,
            active_page: None,
            chunk: None,
            closed: BTreeMap::new(),
            plans: BTreeMap::new(),
            pass: None,
            build: BuildStats::default(),
            abandoned: false,
            shut_down: false,
            store,
            config,
        })
    }

    pub fn config(&self) -> &RetainConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    pub fn nodes(&self) -> &ScanNodeStore {
        &self.nodes
    }

    pub fn occurrences(&self) -> &OccurrenceIndex {
        &self.occurrences
    }

    pub fn hash_stats(&self) -> MemoStats {
        self.hashing.stats()
    }

    pub fn coordinator(&self) -> Arc<CompletionCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn closed_page(&self, page: PageIndex) -> Option<&ClosedPage> {
        self.closed.get(&page)
    }

    pub fn page_plan(&self, page: PageIndex) -> Option<&PagePlan> {
        self.plans.get(&page)
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn connect(&mut self) -> Result<(), EngineError> {
        if self.connection.is_some() {
            return Ok(());
        }
        let connection = self.store.connect(
            &self.config.cache_id,
            &self.config.setup_id,
            Arc::clone(&self.coordinator),
        )?;
        info!(
            connection = connection.id,
            cache_id = %connection.cache_id,
            setup_id = %connection.setup_id,
            "connected to cache store"
        );
        self.connection = Some(connection);
        Ok(())
    }

    fn require_connection(&self) -> Result<&Connection, EngineError> {
        self.connection
            .as_ref()
            .ok_or(EngineError::Protocol(ProtocolError::NotConnected))
    }

    /// Start a new range of pages. Blocks until every page of the previous
    /// chunk has been delivered.
    pub fn begin_chunk(&mut self, pages: Range<PageIndex>) -> Result<(), EngineError> {
        if self.active_page.is_some() || self.pass.is_some() {
            return Err(EngineError::WrongPhase(self.phase.current()));
        }
        self.require_connection()?;
        self.wait_for_output()?;

        self.discard_scan();
        self.closed.clear();
        self.plans.clear();
        self.occurrences.clear();
        self.coordinator.forget_completed();
        self.limit.reset();
        self.build = BuildStats::default();
        self.abandoned = false;

        self.phase.reset();
        let first = if self.config.prescan {
            Phase::PreScanning
        } else {
            Phase::Scanning
        };
        self.phase.transition(first)?;
        debug!(start = pages.start, end = pages.end, prescan = self.config.prescan, "chunk started");
        self.chunk = Some(pages);
        Ok(())
    }

    fn check_page(&self, page: PageIndex) -> Result<(), EngineError> {
        match &self.chunk {
            Some(chunk) if chunk.contains(&page) => Ok(()),
            _ => Err(EngineError::UnknownPage(page)),
        }
    }

    pub fn begin_page(
        &mut self,
        page: PageIndex,
        resolver: Arc<dyn ResourceResolver>,
    ) -> Result<(), EngineError> {
        self.check_page(page)?;
        if self.active_page.is_some() {
            return Err(EngineError::WrongPhase(self.phase.current()));
        }
        match self.phase.current() {
            Phase::Scanning => {
                self.hashing.begin_page();
                self.scanner = Some(PageScanner::new(page, resolver, &self.config));
            }
            Phase::PreScanning => {
                self.hashing.begin_page();
                self.prescan_resolver = Some(resolver);
            }
            Phase::Skipping => {}
            other => return Err(EngineError::WrongPhase(other)),
        }
        self.active_page = Some(page);
        Ok(())
    }

    pub fn end_page(&mut self) -> Result<(), EngineError> {
        self.active_page.take().ok_or(EngineError::NoActivePage)?;
        self.prescan_resolver = None;
        let Some(scanner) = self.scanner.take() else {
            return Ok(());
        };

        let mut ctx = ScanContext {
            store: &mut self.nodes,
            occurrences: &mut self.occurrences,
            hashing: &mut self.hashing,
            limit: &mut self.limit,
        };
        let marks = match scanner.finish(&mut ctx) {
            Ok(marks) => marks,
            Err(err) => return Err(self.scan_failed(err)),
        };
        if let Some(evicted) = self.window.push(marks) {
            if let Err(err) = self.close_page(evicted) {
                return Err(self.scan_failed(err));
            }
        }

        if self.phase.current() == Phase::Scanning && self.limit.exceeded() {
            self.abandon_scan("scan limit exceeded");
        }
        Ok(())
    }

    pub fn finish_prescan(&mut self) -> Result<(), EngineError> {
        match self.phase.current() {
            Phase::PreScanning if self.active_page.is_none() => {
                self.phase.transition(Phase::Scanning)?;
                Ok(())
            }
            other => Err(EngineError::WrongPhase(other)),
        }
    }

    /// Build supernodes for every held page, close the pages, and plan and
    /// announce their output.
    pub fn finish_scan(&mut self) -> Result<ChunkReport, EngineError> {
        let current = self.phase.current();
        let chunk = match (&self.chunk, self.active_page) {
            (Some(chunk), None) => chunk.clone(),
            _ => return Err(EngineError::WrongPhase(current)),
        };
        match current {
            Phase::Skipping => {
                self.phase.transition(Phase::Normal)?;
                return Ok(self.report(&chunk));
            }
            Phase::Scanning => {}
            other => return Err(EngineError::WrongPhase(other)),
        }

        let mut pages = self.window.drain();
        let mut failure = None;
        for page in pages.iter_mut().filter(|page| !page.is_built()) {
            match SupernodeBuilder::new(
                &mut self.nodes,
                &mut self.occurrences,
                self.config.merge_lookahead,
            )
            .build(page)
            {
                Ok(stats) => self.build.accumulate(&stats),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            for page in pages {
                page.release(&mut self.nodes);
            }
            return Err(self.scan_failed(err));
        }
        for page in pages {
            let closed = finalize_page(page, &mut self.nodes, &mut self.occurrences);
            self.closed.insert(closed.index, closed);
        }

        self.plan_chunk()?;
        self.phase.transition(Phase::Normal)?;
        let report = self.report(&chunk);
        info!(
            start = report.first_page,
            end = report.end_page,
            pages = report.pages_scanned,
            unique = report.unique_pages,
            elements = report.elements,
            cacheable = report.cacheable_elements,
            replayed = report.replayed_elements,
            "chunk scanned"
        );
        Ok(report)
    }

    /// Finalize a page leaving the window. Every page still held is built
    /// first, so supernodes they share with `page` count those pages.
    fn close_page(&mut self, mut page: PageMarks) -> Result<(), ScanError> {
        let mut built = Ok(());
        if !page.is_built() {
            built = SupernodeBuilder::new(
                &mut self.nodes,
                &mut self.occurrences,
                self.config.merge_lookahead,
            )
            .build(&mut page)
            .map(|stats| self.build.accumulate(&stats));
        }
        for held in self.window.pages_mut().filter(|held| !held.is_built()) {
            if built.is_err() {
                break;
            }
            built = SupernodeBuilder::new(
                &mut self.nodes,
                &mut self.occurrences,
                self.config.merge_lookahead,
            )
            .build(held)
            .map(|stats| self.build.accumulate(&stats));
        }
        if let Err(err) = built {
            page.release(&mut self.nodes);
            return Err(err);
        }
        let closed = finalize_page(page, &mut self.nodes, &mut self.occurrences);
        self.closed.insert(closed.index, closed);
        Ok(())
    }

    fn plan_chunk(&mut self) -> Result<(), EngineError> {
        let connection = self.require_connection()?.clone();
        let output = match self.config.output {
            OutputMode::Store => PassAction::Store,
            OutputMode::Export => PassAction::Export,
        };

        // Whether each cacheable element already had a raster before this chunk.
        let mut cached: BTreeMap<ContentHash, bool> = BTreeMap::new();
        let mut uses: BTreeMap<ContentHash, (BBox, i64)> = BTreeMap::new();
        let mut plans = Vec::with_capacity(self.closed.len());
        let mut definitions = Vec::with_capacity(self.closed.len());

        for closed in self.closed.values() {
            let mut passes = Vec::with_capacity(closed.elements.len());
            for element in &closed.elements {
                let action = if !element.cacheable {
                    PassAction::Render
                } else if cached.contains_key(&element.id) {
                    // An earlier page in this chunk produces it.
                    PassAction::Replay
                } else {
                    let found = self.store.element_query(&connection, element.id)?;
                    cached.insert(element.id, found);
                    if found {
                        PassAction::Replay
                    } else {
                        output
                    }
                };
                if element.cacheable {
                    let entry = uses.entry(element.id).or_insert((BBox::EMPTY, 0));
                    entry.0 = entry.0.union(&element.bbox);
                    entry.1 += 1;
                }
                passes.push(PassPlan {
                    element: element.id,
                    action,
                    omission: element.omission,
                    anchor: element.anchor,
                    bbox: element.bbox,
                });
            }
            definitions.push(PageDefinition {
                page: closed.index,
                element_count: closed.elements.len() as u32,
                elements: closed.elements.iter().map(|element| element.id).collect(),
            });
            plans.push(PagePlan {
                page: closed.index,
                passes,
            });
        }

        for (id, (bbox, count)) in &uses {
            self.store.element_define(&connection, *id, *bbox)?;
            let raise = cached.get(id).copied().unwrap_or(false);
            self.store
                .element_update_hits(&connection, *id, *count, raise)?;
        }
        self.store.page_define(&connection, &definitions)?;
        self.coordinator
            .register_pages(plans.iter().map(|plan| plan.page));
        for plan in plans {
            self.plans.insert(plan.page, plan);
        }
        Ok(())
    }

    fn report(&self, chunk: &Range<PageIndex>) -> ChunkReport {
        ChunkReport {
            first_page: chunk.start,
            end_page: chunk.end,
            pages_scanned: self.limit.scanned(),
            unique_pages: self.limit.unique(),
            abandoned: self.abandoned,
            elements: self.closed.values().map(|page| page.elements.len()).sum(),
            cacheable_elements: self
                .closed
                .values()
                .map(|page| page.cacheable_elements().count())
                .sum(),
            replayed_elements: self.plans.values().map(PagePlan::replayed).sum(),
            supernodes_built: self.build.supernodes_created,
            live_nodes: self.nodes.live_nodes(),
            created_at: Utc::now(),
        }
    }

    /// Start producing pass `index` of `page`'s plan.
    pub fn begin_pass(&mut self, page: PageIndex, index: usize) -> Result<PassAction, EngineError> {
        if self.pass.is_some() || self.active_page.is_some() {
            return Err(EngineError::WrongPhase(self.phase.current()));
        }
        let plan = self.plans.get(&page).ok_or(EngineError::UnknownPage(page))?;
        let pass = plan.passes.get(index).cloned().ok_or(EngineError::NoActivePass)?;
        let closed = self.closed.get(&page).ok_or(EngineError::UnknownPage(page))?;
        let gate = match pass.action {
            PassAction::Replay => PassGate::replay(closed),
            _ => {
                let mask = self
                    .occurrences
                    .omission(&pass.omission)
                    .cloned()
                    .unwrap_or_else(|| OmissionSet::complement_of(closed.mark_count, &[]));
                PassGate::new(closed, mask)
            }
        };

        self.phase.transition(pass.action.phase())?;
        if pass.action.produces_raster() {
            let connection = self.require_connection()?;
            self.store.element_lock(connection, pass.element)?;
            self.store.element_pending(connection, pass.element)?;
        }
        debug!(page, pass = index, action = ?pass.action, element = ?pass.element, "pass started");
        self.pass = Some(ActivePass {
            page,
            element: pass.element,
            action: pass.action,
            gate,
        });
        Ok(pass.action)
    }

    /// Finish the active pass, handing over the raster a Store/Export pass
    /// produced.
    pub fn end_pass(
        &mut self,
        raster: Option<(RasterHandle, usize)>,
    ) -> Result<PassSummary, EngineError> {
        let pass = self.pass.take().ok_or(EngineError::NoActivePass)?;
        if pass.action.produces_raster() {
            let connection = self.require_connection()?;
            match raster {
                Some((handle, size)) => {
                    self.store
                        .element_update_raster(connection, pass.element, handle, size)?;
                }
                None => warn!(page = pass.page, element = ?pass.element, "pass produced no raster"),
            }
            self.store.element_unlock(connection, pass.element)?;
        }
        self.phase.transition(Phase::Normal)?;
        let (executed, skipped) = pass.gate.into_outcome();
        Ok(PassSummary {
            page: pass.page,
            element: pass.element,
            action: pass.action,
            executed,
            skipped,
        })
    }

    /// Every pass of `page` is done; the output side takes over.
    pub fn page_ready(&mut self, page: PageIndex) -> Result<CompletionTicket, EngineError> {
        if !self.plans.contains_key(&page) {
            return Err(EngineError::UnknownPage(page));
        }
        let connection = self.require_connection()?;
        self.store.page_ready(connection, page)?;
        self.coordinator.page_ready(page);
        self.collect_completed();
        Ok(self.coordinator.ticket(page))
    }

    fn collect_completed(&mut self) {
        for page in self.coordinator.drain_completed() {
            self.closed.remove(&page);
            self.plans.remove(&page);
        }
    }

    /// Block until every ready page has been delivered, or the cancel token
    /// fires.
    pub fn wait_for_output(&mut self) -> Result<(), EngineError> {
        let result = self.coordinator.wait_idle(&self.cancel);
        self.collect_completed();
        if result.is_err() {
            self.closed.clear();
            self.plans.clear();
        }
        result.map_err(EngineError::from)
    }

    fn discard_scan(&mut self) -> usize {
        let mut released = 0;
        if let Some(scanner) = self.scanner.take() {
            released += scanner.discard(&mut self.nodes);
        }
        released += self.window.release_all(&mut self.nodes);
        released
    }

    fn abandon_scan(&mut self, reason: &'static str) {
        let destroyed = self.discard_scan();
        self.closed.clear();
        self.abandoned = true;
        info!(
            reason,
            scanned = self.limit.scanned(),
            unique = self.limit.unique(),
            destroyed,
            "abandoning scan"
        );
        if let Err(err) = self.phase.transition(Phase::Skipping) {
            warn!(%err, "cannot skip from the current phase");
        }
    }

    /// Release every claim, abandon in-flight pages and disconnect. Safe to
    /// call more than once; also runs on drop.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.pass = None;
        self.active_page = None;
        self.prescan_resolver = None;
        let released = self.discard_scan();
        self.closed.clear();
        self.plans.clear();
        let abandoned = self.coordinator.abandon();
        self.phase.reset();

        let live = self.nodes.live_nodes();
        if live > 0 {
            warn!(live, "nodes still claimed at shutdown");
            self.nodes.clear();
        }
        debug!(released, abandoned, "engine shut down");

        match self.connection.take() {
            Some(connection) => self.store.disconnect(&connection).map_err(EngineError::from),
            None => Ok(()),
        }
    }

    /// Tear down the chunk's scan state after a fatal error. The engine is
    /// ready for a new chunk afterwards.
    fn scan_failed(&mut self, err: ScanError) -> EngineError {
        let destroyed = self.discard_scan();
        self.active_page = None;
        self.prescan_resolver = None;
        self.closed.clear();
        self.phase.reset();
        warn!(%err, destroyed, "scan failed");
        err.into()
    }
}

impl Drop for RetainEngine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "teardown failed");
        }
    }
}

impl OperatorHooks for RetainEngine {
    type Error = EngineError;

    fn before_operator(&mut self, op: &str, operands: &[Operand]) -> Result<Verdict, EngineError> {
        match self.phase.current() {
            Phase::Skipping => Ok(Verdict::AbandonPass),
            Phase::PreScanning => {
                if let Some(resolver) = &self.prescan_resolver {
                    prescan_operands(&mut self.hashing, resolver.as_ref(), operands);
                }
                if classify(op).is_marking() {
                    Ok(Verdict::Skip)
                } else {
                    Ok(Verdict::Execute)
                }
            }
            Phase::Scanning => {
                let Some(scanner) = self.scanner.as_mut() else {
                    return Err(EngineError::NoActivePage);
                };
                let mut ctx = ScanContext {
                    store: &mut self.nodes,
                    occurrences: &mut self.occurrences,
                    hashing: &mut self.hashing,
                    limit: &mut self.limit,
                };
                match scanner.operator(&mut ctx, op, operands) {
                    Ok(ScanStep::Continue) => Ok(Verdict::Execute),
                    Ok(ScanStep::Unsupported) => {
                        self.abandon_scan("unsupported construct");
                        Ok(Verdict::AbandonPass)
                    }
                    Err(err) => Err(self.scan_failed(err)),
                }
            }
            Phase::Normal | Phase::Storing | Phase::Exporting | Phase::Replaying => {
                Ok(self
                    .pass
                    .as_mut()
                    .map_or(Verdict::Execute, |pass| pass.gate.decide(op)))
            }
        }
    }

    fn after_operator(&mut self, _op: &str, painted: Option<BBox>) -> Result<(), EngineError> {
        if self.phase.current() != Phase::Scanning {
            return Ok(());
        }
        let Some(scanner) = self.scanner.as_mut() else {
            return Ok(());
        };
        let mut ctx = ScanContext {
            store: &mut self.nodes,
            occurrences: &mut self.occurrences,
            hashing: &mut self.hashing,
            limit: &mut self.limit,
        };
        match scanner.painted(&mut ctx, painted) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.scan_failed(err)),
        }
    }

    fn enter_content(&mut self, kind: ContentKind) -> Result<(), EngineError> {
        if let Some(scanner) = self.scanner.as_mut() {
            scanner.enter_content(kind);
        } else if let Some(pass) = self.pass.as_mut() {
            if kind == ContentKind::Glyph {
                pass.gate.enter_glyph();
            }
        }
        Ok(())
    }

    fn exit_content(&mut self) -> Result<(), EngineError> {
        if let Some(scanner) = self.scanner.as_mut() {
            scanner.exit_content();
        } else if let Some(pass) = self.pass.as_mut() {
            pass.gate.exit_glyph();
        }
        Ok(())
    }
}
