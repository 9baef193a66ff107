use super::context;
use super::core::Runtime;
use super::scheduler::Scheduler;
use super::task::JoinHandle;
use crate::reactor::Reactor;

use std::future::Future;
use std::sync::Arc;

/// The reactor and scheduler of one runtime.
///
/// Network constructors take a `Handle` explicitly. [`Handle::current`]
/// provides the usual default.
#[derive(Clone)]
pub struct Handle {
    pub(crate) reactor: Arc<dyn Reactor>,
    pub(crate) scheduler: Scheduler,
}

impl Handle {
    /// Returns the handle of the runtime the calling worker belongs to.
    ///
    /// Outside any worker this is the handle of the process-wide default
    /// runtime, started on first use with [`RuntimeBuilder`] defaults.
    ///
    /// # Panics
    ///
    /// Panics if the default runtime has to be started and cannot be.
    ///
    /// [`RuntimeBuilder`]: crate::RuntimeBuilder
    pub fn current() -> Handle {
        context::current_handle().unwrap_or_else(|| Runtime::global().handle().clone())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        self.scheduler.spawn(future)
    }

    pub fn dispatch<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.dispatch(callback)
    }
}
