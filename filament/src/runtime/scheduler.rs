use super::context;
use super::task::{Job, JoinHandle, Runnable, Task};
use super::work_stealing::injector::Injector;
use super::work_stealing::queue::LocalQueue;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// State shared by a scheduler's handles and its workers.
pub(crate) struct Shared {
    pub(crate) injector: Injector,
    pub(crate) locals: Vec<LocalQueue>,
    shutdown: AtomicBool,
}

/// Entry point for running work on a runtime's worker pool.
///
/// The reactor hands every notification to [`dispatch`](Self::dispatch),
/// so callbacks never run on the reactor thread. Cloning is cheap.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) shared: Arc<Shared>,
}

impl Scheduler {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                injector: Injector::new(),
                locals: (0..workers).map(|_| LocalQueue::new()).collect(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Runs `callback` once on a worker.
    pub fn dispatch<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Arc::new(Job::new(callback)));
    }

    /// Runs `future` to completion on the worker pool.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let task = Arc::new(Task::new(future, Arc::downgrade(&self.shared)));
        self.schedule(task.clone());

        JoinHandle { task }
    }

    /// Queues a runnable: on the current worker's local queue when called
    /// from one of this scheduler's workers, on the injector otherwise.
    /// Work submitted after shutdown is dropped.
    pub(crate) fn schedule(&self, runnable: Arc<dyn Runnable>) {
        if self.is_shutdown() {
            return;
        }

        match context::current_worker(&self.shared) {
            Some(id) => self.shared.locals[id].push(runnable),
            None => self.shared.injector.push(runnable),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.injector.shutdown();
    }

    /// Drops everything still queued. Called once the workers have exited.
    pub(crate) fn clear(&self) {
        self.shared.injector.clear();
        for local in &self.shared.locals {
            local.clear();
        }
    }
}
