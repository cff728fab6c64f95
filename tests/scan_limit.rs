mod common;

use std::sync::Arc;

use common::{connected_engine, fill_rect, scan_page, text_line, Step};
use retain_core::phase::Phase;
use retain_core::protocol::MemoryCacheStore;
use retain_core::RetainConfig;

fn unrelated(page: u32) -> Vec<Step> {
    let x = f64::from(page) * 40.0;
    fill_rect(x, 0.0, x + 30.0, 30.0)
}

fn with_header(page: u32) -> Vec<Step> {
    let mut steps = text_line(50.0, 750.0, &["Header"]);
    steps.extend(unrelated(page));
    steps
}

#[test]
fn distinct_pages_trip_the_limit() {
    let config = RetainConfig {
        scan_limit_percent: 50,
        scan_limit_min_pages: 2,
        ..RetainConfig::v0()
    };
    let store = Arc::new(MemoryCacheStore::new());
    let mut engine = connected_engine(config, store);
    engine.begin_chunk(0..4).unwrap();

    scan_page(&mut engine, 0, &unrelated(0));
    assert_eq!(engine.phase(), Phase::Scanning, "one page is below the minimum");
    scan_page(&mut engine, 1, &unrelated(1));
    assert_eq!(engine.phase(), Phase::Skipping);
    assert!(engine.is_abandoned());

    let outcome = scan_page(&mut engine, 2, &unrelated(2));
    assert!(outcome.abandoned);
    assert_eq!(outcome.executed, 0);
    scan_page(&mut engine, 3, &unrelated(3));

    let report = engine.finish_scan().unwrap();
    assert!(report.abandoned);
    assert_eq!(report.pages_scanned, 2);
    assert_eq!(report.unique_pages, 2);
    assert_eq!(engine.nodes().live_nodes(), 0);
    assert_eq!(engine.phase(), Phase::Normal);
}

#[test]
fn shared_content_keeps_the_scan_going() {
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(RetainConfig::v0(), store);
    engine.begin_chunk(0..4).unwrap();
    for page in 0..4 {
        scan_page(&mut engine, page, &with_header(page));
        assert_eq!(engine.phase(), Phase::Scanning, "page {page}");
    }
    let report = engine.finish_scan().unwrap();
    assert!(!report.abandoned);
    assert_eq!(report.unique_pages, 0);
}

#[test]
fn full_percentage_disables_the_limit() {
    let config = RetainConfig {
        scan_limit_percent: 100,
        ..RetainConfig::v0()
    };
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(config, store);
    engine.begin_chunk(0..4).unwrap();
    for page in 0..4 {
        scan_page(&mut engine, page, &unrelated(page));
    }
    let report = engine.finish_scan().unwrap();
    assert!(!report.abandoned);
    assert_eq!(report.unique_pages, 4);
    assert_eq!(report.cacheable_elements, 0);
}
