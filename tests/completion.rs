use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use retain_core::phase::{CancelToken, CompletionCoordinator, PageStatus, WaitError};

#[test]
fn completion_from_another_thread_wakes_the_waiter() {
    let coordinator = Arc::new(CompletionCoordinator::new(Duration::from_millis(20)));
    coordinator.register_pages([0, 1]);
    coordinator.page_ready(0);
    coordinator.page_ready(1);

    let worker = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || {
            for page in [1, 0] {
                thread::sleep(Duration::from_millis(5));
                coordinator.page_complete(page);
            }
        })
    };
    coordinator.wait_idle(&CancelToken::new()).unwrap();
    worker.join().unwrap();

    assert_eq!(coordinator.pages_remaining(), 0);
    assert_eq!(coordinator.drain_completed(), vec![1, 0]);
}

#[test]
fn cancellation_abandons_outstanding_pages_within_the_poll_interval() {
    let poll = Duration::from_millis(10);
    let coordinator = CompletionCoordinator::new(poll);
    coordinator.register_pages(0..3);
    for page in 0..3 {
        coordinator.page_ready(page);
    }

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        trigger.cancel();
    });

    let started = Instant::now();
    let result = coordinator.wait_idle(&cancel);
    canceller.join().unwrap();

    assert_eq!(result, Err(WaitError::Cancelled { pages_abandoned: 3 }));
    assert_eq!(coordinator.pages_remaining(), 0);
    assert_eq!(coordinator.status(2), Some(PageStatus::Complete));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn ticket_tracks_one_page() {
    let coordinator = Arc::new(CompletionCoordinator::new(Duration::from_millis(5)));
    coordinator.register_pages([7]);
    let ticket = coordinator.ticket(7);
    assert_eq!(ticket.page(), 7);
    assert!(!ticket.is_complete());

    coordinator.page_ready(7);
    coordinator.page_complete(7);
    assert!(ticket.is_complete());
    ticket.wait(&CancelToken::new()).unwrap();

    coordinator.forget_completed();
    assert!(ticket.is_complete(), "forgotten pages were complete");
}

#[test]
fn cancelled_ticket_returns_early() {
    let coordinator = Arc::new(CompletionCoordinator::new(Duration::from_millis(5)));
    coordinator.register_pages([0]);
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(coordinator.ticket(0).wait(&cancel).is_err());
    assert_eq!(coordinator.pages_remaining(), 1);
}
