use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

struct Slot<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

/// Sending half of a one-shot completion.
///
/// Bridges the callback-style state machines (readers, writers,
/// connecters) to `async` callers.
pub(crate) struct Completer<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

/// Receiving half of a one-shot completion.
pub(crate) struct Completion<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

/// Creates a connected completer/completion pair.
pub(crate) fn completion<T>() -> (Completer<T>, Completion<T>) {
    let slot = Arc::new(Mutex::new(Slot {
        value: None,
        waker: None,
    }));

    (Completer { slot: slot.clone() }, Completion { slot })
}

impl<T> Completer<T> {
    /// Stores the value and wakes the waiting task, if any.
    pub(crate) fn complete(self, value: T) {
        let waker = {
            let mut slot = self.slot.lock().unwrap();
            slot.value = Some(value);
            slot.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.slot.lock().unwrap();

        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
