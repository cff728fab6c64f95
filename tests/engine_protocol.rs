mod common;

use std::sync::Arc;

use common::{connected_engine, fill_rect, op, page_of, produce_page, resolver, run, scan_page, text_line, Step};
use retain_core::config::OutputMode;
use retain_core::engine::PassAction;
use retain_core::phase::Phase;
use retain_core::protocol::{CacheEvent, MemoryCacheStore, ProtocolError};
use retain_core::types::{BBox, ScanError};
use retain_core::{EngineError, RetainConfig, RetainEngine};

fn statement() -> Vec<Step> {
    page_of(vec![
        fill_rect(0.0, 0.0, 600.0, 20.0),
        text_line(50.0, 750.0, &["Monthly", "statement"]),
    ])
}

fn names(events: &[CacheEvent]) -> Vec<&'static str> {
    events.iter().map(CacheEvent::name).collect()
}

#[test]
fn golden_event_sequence_for_one_chunk() {
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(RetainConfig::v0(), store.clone());
    engine.begin_chunk(0..2).unwrap();
    for page in 0..2 {
        scan_page(&mut engine, page, &statement());
    }
    let report = engine.finish_scan().unwrap();
    assert_eq!(report.elements, 2);
    assert_eq!(report.cacheable_elements, 2);
    assert_eq!(report.replayed_elements, 1);

    for page in 0..2 {
        produce_page(&mut engine, page, &statement());
        engine.page_ready(page).unwrap();
    }
    engine.shutdown().unwrap();

    let events = store.events();
    assert_eq!(
        names(&events),
        vec![
            "connect",
            "element_query",
            "element_define",
            "element_update_hits",
            "page_define",
            "element_lock",
            "element_pending",
            "element_update_raster",
            "element_unlock",
            "page_ready",
            "page_complete",
            "page_ready",
            "page_complete",
            "disconnect",
        ]
    );

    let id = match &events[1] {
        CacheEvent::ElementQuery { id, found, .. } => {
            assert!(!found);
            *id
        }
        other => panic!("expected element_query, got {other:?}"),
    };
    match &events[3] {
        CacheEvent::ElementUpdateHits { delta, raise, .. } => {
            assert_eq!(*delta, 2);
            assert!(!raise);
        }
        other => panic!("expected element_update_hits, got {other:?}"),
    }
    match &events[4] {
        CacheEvent::PageDefine { pages, .. } => {
            assert_eq!(pages.len(), 2);
            assert_eq!(pages[0].element_count, 1);
            assert_eq!(pages[1].elements, vec![id]);
        }
        other => panic!("expected page_define, got {other:?}"),
    }

    let stored = store.element(&id).unwrap();
    assert!(stored.raster.is_some());
    assert!(!stored.locked);
    assert_eq!(store.connection_count(), 0);
}

#[test]
fn second_chunk_replays_what_the_first_stored() {
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(RetainConfig::v0(), store.clone());

    engine.begin_chunk(0..2).unwrap();
    for page in 0..2 {
        scan_page(&mut engine, page, &statement());
    }
    engine.finish_scan().unwrap();
    for page in 0..2 {
        produce_page(&mut engine, page, &statement());
        engine.page_ready(page).unwrap();
    }
    store.take_events();

    engine.begin_chunk(2..4).unwrap();
    for page in 2..4 {
        scan_page(&mut engine, page, &statement());
    }
    let report = engine.finish_scan().unwrap();
    assert_eq!(report.replayed_elements, 2);
    let plan = engine.page_plan(2).unwrap();
    assert!(plan.passes.iter().all(|pass| pass.action == PassAction::Replay));

    let raised = store.events().iter().any(|event| {
        matches!(event, CacheEvent::ElementUpdateHits { raise: true, .. })
    });
    assert!(raised, "cached elements ask the store to keep them");
    for page in 2..4 {
        let summaries = produce_page(&mut engine, page, &statement());
        assert!(summaries.iter().all(|summary| summary.executed.is_empty()));
        engine.page_ready(page).unwrap();
    }
}

#[test]
fn export_mode_runs_exporting_passes() {
    let config = RetainConfig {
        output: OutputMode::Export,
        ..RetainConfig::v0()
    };
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(config, store);
    engine.begin_chunk(0..2).unwrap();
    for page in 0..2 {
        scan_page(&mut engine, page, &statement());
    }
    engine.finish_scan().unwrap();

    let action = engine.begin_pass(0, 0).unwrap();
    assert_eq!(action, PassAction::Export);
    assert_eq!(engine.phase(), Phase::Exporting);
    run(&mut engine, &statement()).unwrap();
    engine.end_pass(None).unwrap();
    assert_eq!(engine.phase(), Phase::Normal);
}

#[test]
fn refused_connection_is_reported() {
    let mut engine = RetainEngine::new(RetainConfig::v0(), Arc::new(MemoryCacheStore::refusing())).unwrap();
    match engine.connect() {
        Err(EngineError::Protocol(ProtocolError::ConnectRefused { cache_id, .. })) => {
            assert_eq!(cache_id, "default");
        }
        other => panic!("expected a refused connection, got {other:?}"),
    }
    assert!(matches!(
        engine.begin_chunk(0..1),
        Err(EngineError::Protocol(ProtocolError::NotConnected))
    ));
}

#[test]
fn pages_outside_the_chunk_are_rejected() {
    let store = Arc::new(MemoryCacheStore::new());
    let mut engine = connected_engine(RetainConfig::v0(), store);
    engine.begin_chunk(0..2).unwrap();
    assert!(matches!(
        engine.begin_page(5, resolver()),
        Err(EngineError::UnknownPage(5))
    ));
}

#[test]
fn unsupported_content_abandons_the_scan() {
    let store = Arc::new(MemoryCacheStore::new());
    let mut engine = connected_engine(RetainConfig::v0(), store.clone());
    engine.begin_chunk(0..2).unwrap();
    scan_page(&mut engine, 0, &statement());

    let mut steps = statement();
    steps.push(op("PS", vec![]));
    let outcome = scan_page(&mut engine, 1, &steps);
    assert!(outcome.abandoned);
    assert_eq!(engine.phase(), Phase::Skipping);
    assert_eq!(engine.nodes().live_nodes(), 0, "abandoning releases every claim");

    let report = engine.finish_scan().unwrap();
    assert!(report.abandoned);
    assert_eq!(report.elements, 0);
    assert_eq!(engine.phase(), Phase::Normal);
    assert!(engine.page_plan(0).is_none());
    assert!(!names(&store.events()).contains(&"page_define"));
}

#[test]
fn shutdown_mid_scan_releases_everything() {
    let store = Arc::new(MemoryCacheStore::new());
    let mut engine = connected_engine(RetainConfig::v0(), store.clone());
    engine.begin_chunk(0..3).unwrap();
    scan_page(&mut engine, 0, &statement());
    engine.begin_page(1, resolver()).unwrap();
    run(&mut engine, &statement()).unwrap();
    assert!(engine.nodes().live_nodes() > 0);

    engine.shutdown().unwrap();
    assert_eq!(engine.nodes().live_nodes(), 0);
    assert_eq!(engine.phase(), Phase::Normal);
    assert_eq!(store.connection_count(), 0);
    // Idempotent.
    engine.shutdown().unwrap();
}

#[test]
fn dropping_the_engine_disconnects() {
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    {
        let mut engine = connected_engine(RetainConfig::v0(), store.clone());
        engine.begin_chunk(0..2).unwrap();
        for page in 0..2 {
            scan_page(&mut engine, page, &statement());
        }
        engine.finish_scan().unwrap();
        assert_eq!(engine.coordinator().pages_remaining(), 2);
    }
    assert_eq!(store.connection_count(), 0);
}

#[test]
fn windowed_scan_closes_pages_early() {
    let config = RetainConfig {
        window_pages: Some(1),
        ..RetainConfig::v0()
    };
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(config, store);
    engine.begin_chunk(0..3).unwrap();
    scan_page(&mut engine, 0, &statement());
    assert!(engine.closed_page(0).is_none());
    scan_page(&mut engine, 1, &statement());
    let early = engine.closed_page(0).expect("page 0 left the window");
    assert_eq!(early.elements.len(), 1);
    assert!(early.elements.iter().all(|element| element.pages == 2));

    scan_page(&mut engine, 2, &statement());
    engine.finish_scan().unwrap();
    let last = engine.closed_page(2).unwrap();
    assert!(last.elements.iter().all(|element| element.pages == 3));
    for page in 0..3 {
        produce_page(&mut engine, page, &statement());
        engine.page_ready(page).unwrap();
    }
}

#[test]
fn prescan_hashes_resources_without_marking() {
    let config = RetainConfig {
        prescan: true,
        ..RetainConfig::v0()
    };
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(config, store);
    engine.begin_chunk(0..2).unwrap();
    assert_eq!(engine.phase(), Phase::PreScanning);
    for page in 0..2 {
        let outcome = scan_page(&mut engine, page, &statement());
        assert_eq!(outcome.skipped, 3, "marking operators do not paint during prescan");
    }
    assert_eq!(engine.nodes().live_nodes(), 0);
    assert!(engine.hash_stats().resource_misses > 0);

    engine.finish_prescan().unwrap();
    assert_eq!(engine.phase(), Phase::Scanning);
    for page in 0..2 {
        scan_page(&mut engine, page, &statement());
    }
    let report = engine.finish_scan().unwrap();
    assert_eq!(report.elements, 2);
}

fn capped(max_scan_nodes: usize) -> RetainEngine {
    let config = RetainConfig {
        max_scan_nodes,
        ..RetainConfig::v0()
    };
    connected_engine(config, Arc::new(MemoryCacheStore::new().with_auto_complete(true)))
}

fn two_fills() -> Vec<Step> {
    page_of(vec![
        fill_rect(0.0, 0.0, 10.0, 10.0),
        fill_rect(20.0, 0.0, 30.0, 10.0),
    ])
}

fn assert_exhausted(result: Result<impl std::fmt::Debug, EngineError>) {
    match result {
        Err(EngineError::Scan(ScanError::ResourceExhausted { what: "scan nodes", .. })) => {}
        other => panic!("expected node exhaustion, got {other:?}"),
    }
}

/// After a fatal scan error nothing is held and the next chunk starts
/// without any further cleanup from the caller.
fn assert_ready_for_next_chunk(engine: &mut RetainEngine) {
    assert_eq!(engine.nodes().live_nodes(), 0);
    assert_eq!(engine.phase(), Phase::Normal);
    assert!(engine.closed_page(0).is_none());
    engine.begin_chunk(0..1).unwrap();
    assert_eq!(engine.phase(), Phase::Scanning);
    scan_page(engine, 0, &page_of(vec![fill_rect(0.0, 0.0, 10.0, 10.0)]));
    let report = engine.finish_scan().unwrap();
    assert_eq!(report.elements, 1);
}

#[test]
fn invariant_exhaustion_while_recording_a_mark_tears_down_the_chunk() {
    let mut engine = capped(1);
    engine.begin_chunk(0..2).unwrap();
    engine.begin_page(0, resolver()).unwrap();
    assert_exhausted(run(&mut engine, &two_fills()));

    assert!(matches!(engine.end_page(), Err(EngineError::NoActivePage)));
    assert_ready_for_next_chunk(&mut engine);
}

#[test]
fn invariant_exhaustion_while_building_supernodes_tears_down_the_chunk() {
    // Both leaves fit; the supernode joining them does not.
    let mut engine = capped(2);
    engine.begin_chunk(0..2).unwrap();
    for page in 0..2 {
        scan_page(&mut engine, page, &two_fills());
    }
    assert_eq!(engine.nodes().live_nodes(), 2);
    assert_exhausted(engine.finish_scan());

    assert_ready_for_next_chunk(&mut engine);
}

#[test]
fn invariant_exhaustion_while_closing_a_windowed_page_tears_down_the_chunk() {
    let config = RetainConfig {
        max_scan_nodes: 2,
        window_pages: Some(1),
        ..RetainConfig::v0()
    };
    let mut engine = connected_engine(config, Arc::new(MemoryCacheStore::new().with_auto_complete(true)));
    engine.begin_chunk(0..2).unwrap();
    scan_page(&mut engine, 0, &two_fills());
    engine.begin_page(1, resolver()).unwrap();
    run(&mut engine, &two_fills()).unwrap();
    assert_exhausted(engine.end_page());

    assert_ready_for_next_chunk(&mut engine);
}

#[test]
fn empty_paint_at_the_node_ceiling_rebinds_to_the_sentinel() {
    let mut engine = capped(1);
    engine.begin_chunk(0..1).unwrap();
    let steps = page_of(vec![
        vec![
            op("re", vec![]),
            Step::Op {
                op: "f",
                operands: vec![],
                painted: Some(BBox::new(5.0, 5.0, 5.0, 5.0)),
            },
        ],
        fill_rect(20.0, 0.0, 30.0, 10.0),
    ]);
    // The first fill fills the store; painting nothing hands its node back
    // before the second fill needs one.
    scan_page(&mut engine, 0, &steps);
    assert_eq!(engine.nodes().live_nodes(), 1);
    engine.finish_scan().unwrap();
}
