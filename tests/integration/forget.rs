//! Fire-and-forget: every fault is reported exactly once, nothing else is.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tasklane::{
    delay, demo, CancellationSource, ExecutionContext, Forget, ForgetState, ForgetStrategy,
    ReportSink, Scheduler,
};

const STRATEGIES: [ForgetStrategy; 3] = [
    ForgetStrategy::AwaitCatch,
    ForgetStrategy::OnFaultContinuation,
    ForgetStrategy::DetachedAwaitCatch,
];

#[derive(Default)]
struct Collect {
    messages: Mutex<Vec<String>>,
}

impl ReportSink for Collect {
    fn report(
        &self,
        error: &anyhow::Error,
    ) {
        self.messages.lock().push(error.to_string());
    }
}

fn settle(scheduler: &Scheduler) {
    assert!(scheduler.run_until_idle(Duration::from_secs(5)));
}

#[test]
fn test_fault_reported_exactly_once_per_strategy() {
    let scheduler = crate::scheduler(2);
    for strategy in STRATEGIES {
        let sink = Arc::new(Collect::default());
        let receipt = scheduler
            .run_on_main(async {
                delay(Duration::from_millis(1)).await;
                Err::<(), _>(anyhow::anyhow!("late failure"))
            })
            .forget_using(strategy, sink.clone());
        settle(&scheduler);

        assert_eq!(*sink.messages.lock(), vec!["late failure"], "{:?}", strategy);
        assert_eq!(receipt.state(), ForgetState::Reported);
    }
    assert_eq!(scheduler.stats().reported_faults, 3);
    assert_eq!(scheduler.stats().unobserved_faults, 0);
}

#[test]
fn test_success_reports_nothing() {
    let scheduler = crate::scheduler(2);
    for strategy in STRATEGIES {
        let sink = Arc::new(Collect::default());
        let receipt = scheduler
            .run_on_worker(async { Ok(5) })
            .forget_using(strategy, sink.clone());
        settle(&scheduler);

        assert!(sink.messages.lock().is_empty());
        assert_eq!(receipt.state(), ForgetState::Succeeded);
    }
}

#[test]
fn test_fault_before_first_suspension_is_caught() {
    let scheduler = crate::scheduler(2);
    for strategy in STRATEGIES {
        let sink = Arc::new(Collect::default());
        let handle = scheduler.run_on_main(async { Err::<(), _>(anyhow::anyhow!("early")) });
        // The task has already faulted when the forget is attached.
        scheduler.on_tick();
        assert!(handle.is_finished());

        handle.forget_using(strategy, sink.clone());
        settle(&scheduler);
        assert_eq!(*sink.messages.lock(), vec!["early"], "{:?}", strategy);
    }
}

#[test]
fn test_dropped_handle_fault_is_unobserved() {
    let reports = Arc::new(AtomicUsize::new(0));
    let counter = reports.clone();
    let sink: Arc<dyn ReportSink> = Arc::new(move |_: &anyhow::Error| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let scheduler = Scheduler::with_sink(crate::config(2), sink).unwrap();

    scheduler
        .run_on_main(async { Err::<(), _>(anyhow::anyhow!("nobody looks")) })
        .detach();
    settle(&scheduler);

    assert_eq!(reports.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.stats().unobserved_faults, 1);
    assert_eq!(scheduler.stats().faulted, 1);
}

#[test]
fn test_strategy_report_contexts() {
    let scheduler = crate::scheduler(2);
    let summary = demo::forget(&scheduler);
    assert_eq!(summary.unobserved, 1);

    let contexts: Vec<_> = summary
        .runs
        .iter()
        .map(|run| {
            assert_eq!(run.state, ForgetState::Reported, "{}", run.label);
            assert_eq!(run.reports.len(), 1, "{}", run.label);
            assert_eq!(run.reports[0].0, format!("Exception on {}", run.label));
            run.reports[0].1
        })
        .collect();

    assert_eq!(contexts[0], ExecutionContext::Main);
    assert_eq!(contexts[1], ExecutionContext::Main);
    assert!(contexts[2].is_worker());
}

#[test]
fn test_forget_with_sees_original_error() {
    let scheduler = crate::scheduler(2);
    let seen = Arc::new(Mutex::new(None));
    let slot = seen.clone();

    scheduler
        .run_on_worker(async {
            Err::<(), _>(anyhow::anyhow!("root cause").context("loading level 3"))
        })
        .forget_with(move |e| {
            *slot.lock() = Some(format!("{:#}", e));
        });
    settle(&scheduler);

    assert_eq!(seen.lock().as_deref(), Some("loading level 3: root cause"));
}

#[test]
fn test_panic_is_reported() {
    let scheduler = crate::scheduler(2);
    let sink = Arc::new(Collect::default());
    scheduler
        .run_on_worker(async {
            if true {
                panic!("worker blew up");
            }
            Ok::<(), anyhow::Error>(())
        })
        .forget_using(ForgetStrategy::AwaitCatch, sink.clone());
    settle(&scheduler);

    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("worker blew up"));
}

#[test]
fn test_cancelled_task_is_discarded_silently() {
    let scheduler = crate::scheduler(2);
    let sink = Arc::new(Collect::default());
    let source = CancellationSource::new();
    let token = source.token();
    source.cancel();

    let receipt = scheduler
        .run_on_main(async move {
            token.check()?;
            Ok::<(), anyhow::Error>(())
        })
        .forget_using(ForgetStrategy::OnFaultContinuation, sink.clone());
    settle(&scheduler);

    assert_eq!(receipt.state(), ForgetState::Discarded);
    assert!(sink.messages.lock().is_empty());
    assert_eq!(scheduler.stats().cancelled, 1);
}

#[test]
fn test_handle_forget_uses_scheduler_sink() {
    let sink = Arc::new(Collect::default());
    let scheduler = Scheduler::with_sink(crate::config(2), sink.clone()).unwrap();

    let receipt = scheduler.forget(async { Err::<(), _>(anyhow::anyhow!("via default sink")) });
    settle(&scheduler);

    assert_eq!(receipt.state(), ForgetState::Reported);
    assert_eq!(*sink.messages.lock(), vec!["via default sink"]);
}

#[test]
fn test_panicking_sink_is_contained() {
    let scheduler = crate::scheduler(2);
    let receipt = scheduler
        .run_on_main(async { Err::<(), _>(anyhow::anyhow!("bad")) })
        .forget_with(|_| panic!("sink failure"));
    settle(&scheduler);

    assert_eq!(receipt.state(), ForgetState::Reported);
    let ok = scheduler.run_on_main(async { Ok(1) });
    assert_eq!(scheduler.run_until(ok).unwrap(), 1);
}

#[test]
fn test_await_catch_from_foreign_thread_watches_on_worker() {
    let scheduler = crate::scheduler(2);
    let handle = scheduler.handle();
    let sink = Arc::new(Mutex::new(Vec::new()));
    let recorder = sink.clone();

    std::thread::spawn(move || {
        handle
            .run_on_worker(async { Err::<(), _>(anyhow::anyhow!("from outside")) })
            .forget_with(move |_| recorder.lock().push(ExecutionContext::current()));
    })
    .join()
    .unwrap();
    settle(&scheduler);

    let contexts = sink.lock();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].is_worker());
}

#[test]
fn test_fault_reported_when_watcher_never_runs() {
    for strategy in STRATEGIES {
        let mut scheduler = crate::scheduler(2);
        let sink = Arc::new(Collect::default());
        let receipt = scheduler
            .run_on_worker(async { Err::<(), _>(anyhow::anyhow!("worker fault")) })
            .forget_using(strategy, sink.clone());

        let start = Instant::now();
        while scheduler.stats().faulted == 0 && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        // No tick: a main-lane watcher is still queued when the scheduler stops.
        scheduler.shutdown();

        assert_eq!(*sink.messages.lock(), vec!["worker fault"], "{:?}", strategy);
        assert_eq!(receipt.state(), ForgetState::Reported, "{:?}", strategy);
        assert_eq!(scheduler.stats().unobserved_faults, 0, "{:?}", strategy);
    }
}

#[test]
fn test_forget_after_shutdown_reaches_terminal_state() {
    let mut scheduler = crate::scheduler(1);
    let handle = scheduler.run_on_main(async { Ok(()) });
    scheduler.shutdown();

    let sink = Arc::new(Collect::default());
    let receipt = handle.forget_using(ForgetStrategy::AwaitCatch, sink.clone());
    assert_eq!(receipt.state(), ForgetState::Discarded);
    assert!(sink.messages.lock().is_empty());
}
