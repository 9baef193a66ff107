use super::state::{COMPLETED, IDLE, NOTIFIED, QUEUED, RUNNING};
use crate::runtime::scheduler::{Scheduler, Shared};

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};

use tracing::error;

/// Anything a worker can execute.
pub(crate) trait Runnable: Send + Sync {
    fn run(self: Arc<Self>);
}

/// A dispatched callback. Runs once.
pub(crate) struct Job {
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Job {
    pub(crate) fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }
}

impl Runnable for Job {
    fn run(self: Arc<Self>) {
        let callback = self.callback.lock().unwrap().take();

        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!("dispatched callback panicked");
            }
        }
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A spawned future together with its scheduling state and output slot.
pub(crate) struct Task<T> {
    future: Mutex<Option<BoxFuture<T>>>,
    pub(crate) result: Mutex<Option<T>>,
    pub(crate) state: AtomicUsize,

    /// Set when the future panicked instead of producing a value.
    pub(crate) panicked: AtomicBool,

    /// Wakers of `JoinHandle`s awaiting the output.
    pub(crate) waiters: Mutex<Vec<Waker>>,

    /// Weak so that queued tasks do not keep a shut-down pool alive.
    scheduler: Weak<Shared>,
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn new<F>(future: F, scheduler: Weak<Shared>) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            future: Mutex::new(Some(Box::pin(future))),
            result: Mutex::new(None),
            state: AtomicUsize::new(QUEUED),
            panicked: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
            scheduler,
        }
    }

    fn poll_once(self: Arc<Self>) {
        let current = self.state.load(Ordering::Acquire);

        if current != QUEUED && current != NOTIFIED {
            return;
        }

        if self
            .state
            .compare_exchange(current, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let outcome = {
            let mut slot = self.future.lock().unwrap();
            let Some(future) = slot.as_mut() else {
                return;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            if !matches!(outcome, Ok(Poll::Pending)) {
                *slot = None;
            }
            outcome
        };

        match outcome {
            Ok(Poll::Pending) => {
                if self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken while running.
                    self.state.store(QUEUED, Ordering::Release);
                    self.reschedule();
                }
            }
            Ok(Poll::Ready(value)) => {
                *self.result.lock().unwrap() = Some(value);
                self.finish();
            }
            Err(_) => {
                error!("spawned task panicked");
                self.panicked.store(true, Ordering::Release);
                self.finish();
            }
        }
    }

    fn finish(&self) {
        self.state.store(COMPLETED, Ordering::Release);

        let waiters = std::mem::take(&mut *self.waiters.lock().unwrap());
        for waker in waiters {
            waker.wake();
        }
    }

    fn reschedule(self: Arc<Self>) {
        if let Some(shared) = self.scheduler.upgrade() {
            Scheduler::from_shared(shared).schedule(self);
        }
    }
}

impl<T: Send + 'static> Runnable for Task<T> {
    fn run(self: Arc<Self>) {
        self.poll_once();
    }
}

impl<T: Send + 'static> Wake for Task<T> {
    fn wake(self: Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.reschedule();
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.clone().wake();
    }
}
