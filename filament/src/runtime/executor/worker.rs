use crate::runtime::context;
use crate::runtime::handle::Handle;
use crate::runtime::task::Runnable;

use std::sync::Arc;

use tracing::trace;

/// One thread of the worker pool.
///
/// The execution order is:
/// 1. Pop from the local queue
/// 2. Steal from the global injector
/// 3. Steal from other workers
/// 4. Park if no work is available
pub(crate) struct Worker {
    id: usize,
    handle: Handle,
}

impl Worker {
    pub(crate) fn new(id: usize, handle: Handle) -> Self {
        Self { id, handle }
    }

    /// Runs until the scheduler shuts down. The worker context stays
    /// installed for the whole loop so that work scheduled from inside a
    /// task lands on this worker's local queue.
    pub(crate) fn run(self) {
        let handle = self.handle.clone();
        let id = self.id;

        context::enter(handle, id, || {
            trace!(worker = id, "worker started");

            let scheduler = &self.handle.scheduler;
            while !scheduler.is_shutdown() {
                if let Some(task) = self.next() {
                    task.run();
                    continue;
                }

                scheduler.shared.injector.park();
            }

            trace!(worker = id, "worker stopped");
        });
    }

    fn next(&self) -> Option<Arc<dyn Runnable>> {
        let shared = &self.handle.scheduler.shared;

        shared.locals[self.id]
            .pop()
            .or_else(|| shared.injector.steal())
            .or_else(|| self.try_steal())
    }

    /// Visits peers round-robin, starting after this worker.
    fn try_steal(&self) -> Option<Arc<dyn Runnable>> {
        let locals = &self.handle.scheduler.shared.locals;
        let len = locals.len();

        if len <= 1 {
            return None;
        }

        (1..len)
            .map(|i| (self.id + i) % len)
            .find_map(|victim| locals[victim].steal())
    }
}
