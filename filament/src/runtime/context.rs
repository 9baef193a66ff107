use super::handle::Handle;
use super::scheduler::Shared;

use std::cell::RefCell;
use std::sync::Arc;

/// What a worker thread knows about the runtime it belongs to.
struct WorkerContext {
    handle: Handle,
    id: usize,
}

thread_local! {
    /// Set for the lifetime of every worker thread.
    static CURRENT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Installs the worker context for the duration of `f`.
pub(crate) fn enter<R>(handle: Handle, id: usize, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|cell| cell.replace(Some(WorkerContext { handle, id })));
    let out = f();
    CURRENT.with(|cell| cell.replace(previous));
    out
}

/// Handle of the runtime owning the current thread, if it is a worker.
pub(crate) fn current_handle() -> Option<Handle> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|ctx| ctx.handle.clone()))
}

/// Index of the current worker if it belongs to the scheduler `shared`.
pub(crate) fn current_worker(shared: &Arc<Shared>) -> Option<usize> {
    CURRENT.with(|cell| {
        cell.borrow()
            .as_ref()
            .filter(|ctx| Arc::ptr_eq(&ctx.handle.scheduler.shared, shared))
            .map(|ctx| ctx.id)
    })
}
