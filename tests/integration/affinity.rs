//! Where task code runs before and after each await.

use std::time::Duration;

use tasklane::demo;
use tasklane::ExecutionContext;

#[test]
fn test_walkthrough_contexts() {
    let scheduler = crate::scheduler(4);
    let traces = demo::affinity(&scheduler, 2, Duration::from_millis(5)).unwrap();
    let labels: Vec<_> = traces.iter().map(|t| t.label).collect();
    assert_eq!(labels, vec!["worker", "worker-then-main", "main"]);

    let worker = &traces[0];
    assert_eq!(worker.samples.len(), 3);
    assert!(worker.samples.iter().all(|s| s.context.is_worker()));

    let back_to_main = &traces[1];
    assert!(back_to_main.samples[0].context.is_worker());
    assert!(back_to_main.samples[1..]
        .iter()
        .all(|s| s.context == ExecutionContext::Main));

    let main = &traces[2];
    assert!(main.samples.iter().all(|s| s.context == ExecutionContext::Main));
    assert!(main.stayed_on_one_thread());
    assert_eq!(main.samples[0].thread, std::thread::current().id());
}

#[test]
fn test_worker_traces_eventually_move() {
    let scheduler = crate::scheduler(4);
    let mut moved = false;
    for _ in 0..16 {
        let traces = demo::affinity(&scheduler, 3, Duration::from_millis(1)).unwrap();
        if !traces[0].stayed_on_one_thread() {
            moved = true;
            break;
        }
    }
    assert!(moved, "worker trace never changed thread");
}

#[test]
fn test_zero_awaits() {
    let scheduler = crate::scheduler(1);
    let traces = demo::affinity(&scheduler, 0, Duration::from_millis(1)).unwrap();
    assert!(traces.iter().all(|t| t.samples.len() == 1));
    assert!(traces.iter().all(|t| t.stayed_on_one_thread()));
}
