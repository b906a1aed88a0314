//! Cancellation observed at suspension points.

use std::time::Duration;

use tasklane::{
    delay_cancellable, demo, next_tick, next_tick_cancellable, CancellationSource,
    CancellationToken, Cancelled, Signal, TaskError, TaskState,
};

#[test]
fn test_walkthrough_states() {
    let scheduler = crate::scheduler(2);
    let summary = demo::cancellation(&scheduler);
    assert_eq!(summary.pre_cancelled, TaskState::Cancelled);
    assert_eq!(summary.owner_dropped, TaskState::Cancelled);
    assert_eq!(scheduler.stats().faulted, 0);
}

#[test]
fn test_pre_cancelled_token_never_starts_the_body() {
    let scheduler = crate::scheduler(2);
    let source = CancellationSource::new();
    source.cancel();
    let token = source.token();

    let handle = scheduler.run_on_main(async move {
        token
            .run(async {
                panic!("body must not run");
            })
            .await?;
        Ok::<(), anyhow::Error>(())
    });

    let err = scheduler.run_until(handle).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(scheduler.stats().cancelled, 1);
}

#[test]
fn test_cancel_wakes_a_long_delay() {
    let scheduler = crate::scheduler(2);
    let owner = CancellationSource::new().cancel_on_drop();
    let token = owner.token();

    let handle = scheduler.run_on_worker(async move {
        delay_cancellable(Duration::from_secs(600), &token).await?;
        Ok::<(), anyhow::Error>(())
    });
    std::thread::sleep(Duration::from_millis(10));
    drop(owner);

    assert!(matches!(scheduler.run_until(handle), Err(TaskError::Cancelled)));
}

#[test]
fn test_cancellation_propagates_to_awaiting_task() {
    let scheduler = crate::scheduler(2);
    let source = CancellationSource::new();
    let token = source.token();

    let inner = scheduler.run_on_main(async move {
        for _ in 0..1_000 {
            next_tick_cancellable(&token).await?;
        }
        Ok::<(), anyhow::Error>(())
    });
    let outer = scheduler.run_on_main(async move {
        match inner.await {
            Err(TaskError::Cancelled) => Err(anyhow::Error::new(Cancelled)),
            other => other.map_err(anyhow::Error::new),
        }
    });

    for _ in 0..3 {
        scheduler.on_tick();
    }
    source.cancel();
    assert!(scheduler.run_until(outer).unwrap_err().is_cancelled());
    assert_eq!(scheduler.stats().cancelled, 2);
}

#[test]
fn test_signal_releases_waiters() {
    let scheduler = crate::scheduler(2);
    let signal = Signal::new();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let signal = signal.clone();
            scheduler.run_on_main(async move {
                signal.wait().await;
                Ok(())
            })
        })
        .collect();

    scheduler.on_tick();
    assert!(waiters.iter().all(|w| w.state() == TaskState::Suspended));

    let setter = signal.clone();
    std::thread::spawn(move || setter.set()).join().unwrap();
    assert!(signal.is_set());
    for waiter in waiters {
        scheduler.run_until(waiter).unwrap();
    }

    // A set signal completes immediately.
    let late = scheduler.run_on_main({
        let signal = signal.clone();
        async move {
            signal.wait().await;
            Ok(())
        }
    });
    assert_eq!(scheduler.on_tick(), 1);
    assert!(late.is_finished());
}

#[test]
fn test_signal_wait_cancellable() {
    let scheduler = crate::scheduler(2);
    let signal = Signal::new();
    let source = CancellationSource::new();
    let token = source.token();

    let handle = scheduler.run_on_main(async move {
        signal.wait_cancellable(&token).await?;
        Ok::<(), anyhow::Error>(())
    });
    scheduler.on_tick();
    source.cancel();
    assert!(scheduler.run_until(handle).unwrap_err().is_cancelled());
}

#[test]
fn test_none_token_runs_to_completion() {
    let scheduler = crate::scheduler(1);
    let token = CancellationToken::none();
    let handle = scheduler.run_on_main(async move {
        next_tick_cancellable(&token).await?;
        next_tick().await;
        token.check()?;
        Ok::<(), anyhow::Error>(())
    });
    assert!(scheduler.run_until(handle).is_ok());
}
