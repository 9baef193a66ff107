use super::core::Task;
use super::state::COMPLETED;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};

/// Awaits the output of a spawned task.
///
/// Dropping the handle detaches the task; it keeps running.
///
/// # Panics
///
/// Awaiting the handle of a task whose future panicked panics as well.
pub struct JoinHandle<T> {
    pub(crate) task: Arc<Task<T>>,
}

impl<T> JoinHandle<T> {
    fn take(&self) -> Poll<T> {
        if self.task.panicked.load(Ordering::Acquire) {
            panic!("spawned task panicked");
        }

        match self.task.result.lock().unwrap().take() {
            Some(value) => Poll::Ready(value),
            None => panic!("task output already taken"),
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if self.task.state.load(Ordering::Acquire) == COMPLETED {
            return self.take();
        }

        self.task.waiters.lock().unwrap().push(cx.waker().clone());

        // Re-check after registering so a concurrent completion is not missed.
        if self.task.state.load(Ordering::Acquire) == COMPLETED {
            return self.take();
        }

        Poll::Pending
    }
}
