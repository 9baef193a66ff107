use crate::runtime::task::Runnable;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Global run queue shared by all workers.
///
/// Work submitted from outside the pool (the reactor thread, timers,
/// `block_on` callers) lands here. Idle workers park on the condition
/// variable with a short timeout so that work pushed to a busy worker's
/// local queue is still stolen promptly.
pub(crate) struct Injector {
    queue: Mutex<VecDeque<Arc<dyn Runnable>>>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

impl Injector {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Wakes every parked worker and stops further parking.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    pub(crate) fn push(&self, task: Arc<dyn Runnable>) {
        self.queue.lock().unwrap().push_back(task);
        self.condvar.notify_one();
    }

    /// Parks the calling worker until work arrives, shutdown starts, or
    /// the park interval elapses.
    pub(crate) fn park(&self) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }

        let queue = self.queue.lock().unwrap();
        if !queue.is_empty() {
            return;
        }

        let _ = self
            .condvar
            .wait_timeout(queue, Duration::from_millis(1))
            .unwrap();
    }

    pub(crate) fn steal(&self) -> Option<Arc<dyn Runnable>> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Drops every queued item.
    pub(crate) fn clear(&self) {
        let drained: Vec<_> = self.queue.lock().unwrap().drain(..).collect();
        drop(drained);
    }
}
