use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// A one-shot event any number of tasks can wait on.
///
/// Once fired it stays fired; waiters registering afterwards resolve
/// immediately.
#[derive(Default)]
pub(crate) struct Signal {
    fired: AtomicBool,
    waiters: Mutex<Vec<Waker>>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Returns `false` if it had already fired.
    pub(crate) fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        let waiters = std::mem::take(&mut *self.waiters.lock().unwrap());
        for waker in waiters {
            waker.wake();
        }

        true
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Returns a future resolving once the signal has fired.
    pub(crate) fn wait(self: &Arc<Self>) -> Fired {
        Fired {
            signal: self.clone(),
        }
    }
}

/// Future returned by [`Signal::wait`].
pub struct Fired {
    signal: Arc<Signal>,
}

impl Future for Fired {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.is_fired() {
            return Poll::Ready(());
        }

        self.signal.waiters.lock().unwrap().push(cx.waker().clone());

        // Re-check after registering so a concurrent `fire` is not missed.
        if self.signal.is_fired() {
            return Poll::Ready(());
        }

        Poll::Pending
    }
}
