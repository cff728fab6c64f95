mod common;

use std::sync::Arc;

use common::{connected_engine, fill_rect, page_of, produce_page, scan_page, text_line, Step};
use retain_core::engine::PassAction;
use retain_core::protocol::MemoryCacheStore;
use retain_core::types::{BBox, MarkIndex};
use retain_core::{RetainConfig, RetainEngine};

fn letter(page: u32) -> Vec<Step> {
    let label = format!("Page-{page}");
    page_of(vec![
        text_line(50.0, 750.0, &["ACME", "Corp"]),
        fill_rect(0.0, 0.0, 600.0, 20.0),
        text_line(100.0, 400.0, &[label.as_str()]),
    ])
}

fn retained(engine: &RetainEngine, page: u32, element: usize) -> Vec<MarkIndex> {
    let closed = engine.closed_page(page).unwrap();
    let key = closed.elements[element].omission;
    engine
        .occurrences()
        .omission(&key)
        .unwrap()
        .retained()
        .collect()
}

#[test]
fn invariant_elements_partition_every_page() {
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(RetainConfig::v0(), store);
    engine.begin_chunk(0..3).unwrap();
    for page in 0..3 {
        scan_page(&mut engine, page, &letter(page));
    }
    engine.finish_scan().unwrap();

    for page in 0..3 {
        let closed = engine.closed_page(page).unwrap();
        let mut covered: Vec<MarkIndex> = (0..closed.elements.len())
            .flat_map(|element| retained(&engine, page, element))
            .collect();
        covered.sort_unstable();
        let all: Vec<MarkIndex> = (0..closed.mark_count).collect();
        assert_eq!(covered, all, "page {page}: every mark belongs to exactly one element");
    }
}

#[test]
fn replay_executes_exactly_the_retained_marks() {
    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(RetainConfig::v0(), store.clone());
    engine.begin_chunk(0..3).unwrap();
    for page in 0..3 {
        scan_page(&mut engine, page, &letter(page));
    }
    engine.finish_scan().unwrap();

    for page in 0..3 {
        let plan = engine.page_plan(page).unwrap().clone();
        let summaries = produce_page(&mut engine, page, &letter(page));
        assert_eq!(summaries.len(), plan.passes.len());

        for (index, (summary, pass)) in summaries.iter().zip(&plan.passes).enumerate() {
            assert_eq!(summary.element, pass.element);
            assert_eq!(summary.action, pass.action);
            match pass.action {
                PassAction::Replay => {
                    assert!(summary.executed.is_empty(), "replayed elements are not interpreted");
                }
                _ => {
                    assert_eq!(summary.executed, retained(&engine, page, index), "page {page} pass {index}");
                }
            }
            let element = &engine.closed_page(page).unwrap().elements[index];
            if !element.cacheable {
                assert_eq!(pass.action, PassAction::Render);
            } else if page == 0 {
                assert_eq!(pass.action, PassAction::Store);
            } else {
                assert_eq!(pass.action, PassAction::Replay);
            }
        }

        let ticket = engine.page_ready(page).unwrap();
        assert!(ticket.is_complete());
    }

    assert_eq!(engine.coordinator().pages_remaining(), 0);
    assert!(engine.closed_page(0).is_none(), "delivered pages are dropped");
    assert!(engine.page_plan(0).is_none());
    assert!(store.element_count() > 0);
}

#[test]
fn skipped_form_skips_its_nested_content() {
    let form = |page: u32| {
        let label = format!("No-{page}");
        let mut steps = vec![Step::Form {
            name: "Fm1",
            painted: None,
            body: fill_rect(10.0, 10.0, 20.0, 20.0),
        }];
        steps.extend(text_line(100.0, 400.0, &[label.as_str()]));
        steps
    };

    let store = Arc::new(MemoryCacheStore::new().with_auto_complete(true));
    let mut engine = connected_engine(RetainConfig::v0(), store);
    engine.begin_chunk(0..2).unwrap();
    for page in 0..2 {
        scan_page(&mut engine, page, &form(page));
    }
    engine.finish_scan().unwrap();

    let closed = engine.closed_page(0).unwrap().clone();
    assert_eq!(closed.mark_count, 3);
    assert_eq!(closed.extent_end(0), 2, "the form spans its nested fill");
    assert_eq!(closed.elements.len(), 2);
    let shared = &closed.elements[0];
    assert!(shared.cacheable);
    assert_eq!(shared.covered, 2);
    assert_eq!(shared.bbox, BBox::new(10.0, 10.0, 20.0, 20.0));

    let summaries = produce_page(&mut engine, 0, &form(0));
    let render = summaries
        .iter()
        .find(|summary| summary.action == PassAction::Render)
        .unwrap();
    assert_eq!(render.executed, vec![2]);
    assert_eq!(render.skipped, 1, "one skip covers the whole form");
    let store_pass = summaries
        .iter()
        .find(|summary| summary.action == PassAction::Store)
        .unwrap();
    assert_eq!(store_pass.executed, vec![0, 1]);

    engine.page_ready(0).unwrap();
    produce_page(&mut engine, 1, &form(1));
    engine.page_ready(1).unwrap();
    engine.shutdown().unwrap();
}
