use super::builder::RuntimeBuilder;
use super::executor::worker::Worker;
use super::handle::Handle;
use super::scheduler::Scheduler;
use super::task::JoinHandle;
use crate::reactor;

use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{OnceLock, mpsc};
use std::task::{Context, Poll};
use std::thread;

use tracing::debug;

/// A reactor thread plus a pool of worker threads.
///
/// Dropping the runtime stops the reactor, stops the workers and drops
/// whatever work is still queued.
pub struct Runtime {
    handle: Handle,
    workers: Vec<thread::JoinHandle<()>>,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    /// Starts the scheduler, then the reactor, then the workers.
    pub(crate) fn new(worker_threads: usize) -> io::Result<Self> {
        let scheduler = Scheduler::new(worker_threads);
        let reactor = reactor::start(scheduler.clone())?;
        let handle = Handle { reactor, scheduler };

        let mut workers = Vec::with_capacity(worker_threads);
        for id in 0..worker_threads {
            let worker = Worker::new(id, handle.clone());
            let spawned = thread::Builder::new()
                .name(format!("filament-worker-{id}"))
                .spawn(move || worker.run());

            match spawned {
                Ok(thread) => workers.push(thread),
                Err(err) => {
                    // Unwind what was started so far.
                    drop(Self { handle, workers });
                    return Err(err);
                }
            }
        }

        debug!(workers = worker_threads, "runtime started");

        Ok(Self { handle, workers })
    }

    /// The process-wide default runtime, started on first use.
    ///
    /// # Panics
    ///
    /// Panics if the runtime cannot be started (no poller available, or
    /// threads cannot be spawned).
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| {
            RuntimeBuilder::new()
                .build()
                .expect("failed to start the default runtime")
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs a future to completion on the worker pool, blocking the
    /// calling thread until it finishes.
    ///
    /// Must not be called from one of this runtime's own workers.
    ///
    /// # Panics
    ///
    /// Re-raises a panic of `future` in the caller. Also panics if the
    /// runtime shuts down before the future completes.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (transmitter, receiver) = mpsc::channel();

        // The handle is dropped on purpose; completion is reported through
        // the channel.
        drop(self.spawn(async move {
            let result = CatchUnwind { future: Box::pin(future) }.await;
            let _ = transmitter.send(result);
        }));

        match receiver.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("runtime shut down before block_on completed"),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.scheduler.shutdown();
        self.handle.reactor.shutdown();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }

        self.handle.scheduler.clear();
        debug!("runtime stopped");
    }
}

/// Polls the inner future under `catch_unwind`.
struct CatchUnwind<F: Future> {
    future: Pin<Box<F>>,
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self.future.as_mut();

        match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}
