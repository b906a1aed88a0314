//! TaskQueue / MainQueue unit tests

use crate::runtime::scheduler::queue::{MainQueue, TaskQueue};
use crate::runtime::scheduler::task::{Header, Lane, ResumePolicy, Task, TaskId};
use crate::runtime::scheduler::TaskError;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

fn dummy_task(id: usize) -> Arc<Task> {
    let header = Arc::new(Header::new(
        TaskId(id),
        format!("dummy-{}", id),
        Lane::Main,
        ResumePolicy::MainContext,
    ));
    Arc::new(Task::new(
        header,
        Box::pin(async {}),
        Box::new(|_: TaskError| {}),
        Weak::new(),
    ))
}

fn ids(tasks: impl IntoIterator<Item = Arc<Task>>) -> Vec<usize> {
    tasks.into_iter().map(|t| t.header().id().inner()).collect()
}

#[test]
fn test_task_queue_basic() {
    let queue = TaskQueue::new();
    assert_eq!(queue.len(), 0);
    assert!(queue.pop_front().is_none());
}

#[test]
fn test_task_queue_front_and_back() {
    let queue = TaskQueue::new();
    for id in 1..=3 {
        queue.push(dummy_task(id));
    }
    assert_eq!(queue.len(), 3);

    // Owner pops the oldest, a thief takes the newest.
    assert_eq!(queue.pop_front().unwrap().header().id(), TaskId(1));
    assert_eq!(queue.pop_back().unwrap().header().id(), TaskId(3));
    assert_eq!(ids(queue.drain()), vec![2]);
    assert_eq!(queue.len(), 0);
}

#[test]
fn test_main_queue_batch_is_fifo() {
    let queue = MainQueue::new();
    for id in [4, 1, 7] {
        queue.push(dummy_task(id));
    }
    assert_eq!(ids(queue.take_batch()), vec![4, 1, 7]);
    assert!(queue.is_empty());
}

#[test]
fn test_main_queue_push_after_batch_waits_for_next_batch() {
    let queue = MainQueue::new();
    queue.push(dummy_task(1));
    let batch = queue.take_batch();
    queue.push(dummy_task(2));
    assert_eq!(ids(batch), vec![1]);
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_main_queue_wait_wakes_on_push() {
    let queue = Arc::new(MainQueue::new());
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            queue.push(dummy_task(1));
        })
    };
    let start = Instant::now();
    while queue.is_empty() && start.elapsed() < Duration::from_secs(5) {
        queue.wait_for_work(Duration::from_secs(1));
    }
    producer.join().unwrap();
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_main_queue_wait_times_out_when_empty() {
    let queue = MainQueue::new();
    queue.wait_for_work(Duration::from_millis(5));
    assert!(queue.drain().is_empty());
}
