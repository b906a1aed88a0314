//! Main-lane ordering under arbitrary yield patterns.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use tasklane::next_tick;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Task `i` yields `yields[i]` times. On every tick the tasks still
    /// running step in enqueue order, and nothing runs between ticks.
    #[test]
    fn prop_main_lane_steps_in_enqueue_order(yields in prop::collection::vec(0usize..4, 1..8)) {
        let scheduler = crate::scheduler(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        for (i, &count) in yields.iter().enumerate() {
            let log = log.clone();
            scheduler
                .run_on_main(async move {
                    for step in 0..=count {
                        if step > 0 {
                            next_tick().await;
                        }
                        log.lock().push((step, i));
                    }
                    Ok(())
                })
                .detach();
        }

        let max = yields.iter().copied().max().unwrap_or(0);
        for step in 0..=max {
            scheduler.on_tick();
            let expected: Vec<_> = yields
                .iter()
                .enumerate()
                .filter(|(_, &count)| count >= step)
                .map(|(i, _)| (step, i))
                .collect();
            let mut log = log.lock();
            prop_assert_eq!(log.drain(..).collect::<Vec<_>>(), expected);
        }
        prop_assert_eq!(scheduler.on_tick(), 0);
        prop_assert_eq!(scheduler.stats().live(), 0);
    }
}
