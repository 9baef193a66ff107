use filament::time::{sleep_with, timeout_with};
use filament::{RuntimeBuilder, task};

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_block_on_returns_the_output() {
    for workers in 1..=3 {
        let runtime = RuntimeBuilder::new().worker_threads(workers).build().unwrap();
        assert_eq!(runtime.block_on(async move { workers * 7 }), workers * 7);
    }
}

#[test]
#[should_panic(expected = "worker_threads must be > 0")]
fn test_zero_workers_is_rejected() {
    let _ = RuntimeBuilder::new().worker_threads(0);
}

#[test]
fn test_spawned_tasks_all_complete() {
    let runtime = RuntimeBuilder::new().worker_threads(4).build().unwrap();
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let seen = seen.clone();
            runtime.spawn(async move {
                seen.lock().unwrap().insert(i);
                i * 2
            })
        })
        .collect();

    let total = runtime.block_on(async move {
        let mut total = 0;
        for task in tasks {
            total += task.await;
        }
        total
    });

    assert_eq!(total, (0..64).map(|i| i * 2).sum::<i32>());
    assert_eq!(seen.lock().unwrap().len(), 64);
}

#[test]
fn test_nested_spawns_use_the_same_runtime() {
    let runtime = RuntimeBuilder::new().worker_threads(2).build().unwrap();

    let result = runtime.block_on(async {
        let outer = task::spawn(async {
            let inner = task::spawn(async { thread::current().name().map(str::to_owned) });
            inner.await
        });
        outer.await
    });

    let name = result.expect("tasks run on named workers");
    assert!(name.starts_with("filament-worker-"), "{name}");
}

#[test]
fn test_dispatched_callbacks_run_on_workers() {
    let runtime = RuntimeBuilder::new().worker_threads(2).build().unwrap();
    let (tx, rx) = mpsc::channel();
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let tx = tx.clone();
        let ran = ran.clone();
        runtime.handle().dispatch(move || {
            ran.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(thread::current().name().map(str::to_owned));
        });
    }

    for _ in 0..10 {
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(name.is_some());
    }
    assert_eq!(ran.load(Ordering::SeqCst), 10);
}

#[test]
fn test_timers_belong_to_their_runtime() {
    let first = RuntimeBuilder::new().worker_threads(1).build().unwrap();
    let second = RuntimeBuilder::new().worker_threads(1).build().unwrap();

    let handle = second.handle().clone();
    let outcome = first.block_on(async move {
        timeout_with(&handle, Duration::from_millis(20), sleep_with(&handle, Duration::from_secs(5))).await
    });

    assert!(outcome.is_err());
    drop(second);
}
