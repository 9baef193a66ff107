use std::cell::UnsafeCell;
use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// A queue node. The node currently at the consumer tail is a stub whose
/// value has already been taken.
struct Node<E> {
    next: AtomicPtr<Node<E>>,
    value: Option<E>,
}

impl<E> Node<E> {
    fn alloc(value: Option<E>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

/// Single-active-processor event funnel.
///
/// Readers, writers, connecters and listeners receive events from two
/// directions at once: reactor notifications arriving on a worker, and
/// explicit aborts arriving from whichever context calls them. The
/// funnel serialises both.
///
/// Any context may append an event; appending is a wait-free pointer
/// swap. The context whose append takes the pending count from zero to
/// one becomes the processor and drains events in arrival order, one at
/// a time, until the count drops back to zero. Every other append only
/// enqueues and returns, relying on the active processor to observe it.
///
/// Events appended by the processor itself while it is handling an event
/// are queued behind it instead of recursing.
pub(crate) struct Funnel<E> {
    /// Producer end. Producers swap their node in here.
    head: AtomicPtr<Node<E>>,

    /// Consumer end. Only touched by the active processor.
    tail: UnsafeCell<*mut Node<E>>,

    /// Number of appended events not yet processed.
    pending: AtomicUsize,
}

unsafe impl<E: Send> Send for Funnel<E> {}
unsafe impl<E: Send> Sync for Funnel<E> {}

impl<E> Funnel<E> {
    /// Creates an empty funnel.
    pub(crate) fn new() -> Self {
        let stub = Node::alloc(None);

        Self {
            head: AtomicPtr::new(stub),
            tail: UnsafeCell::new(stub),
            pending: AtomicUsize::new(0),
        }
    }

    /// Appends `event` and, if the caller became the processor, drains
    /// the funnel through `handle`.
    pub(crate) fn submit(&self, event: E, mut handle: impl FnMut(E)) {
        if !self.push(event) {
            return;
        }

        loop {
            // SAFETY: only the context that observed an empty queue (or
            // that is still draining) reaches this point.
            let event = unsafe { self.pop() };
            handle(event);

            if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        }
    }

    /// Links a new node at the head and reports whether the queue was
    /// empty before this append.
    fn push(&self, event: E) -> bool {
        let node = Node::alloc(Some(event));
        let previous = self.head.swap(node, Ordering::AcqRel);

        // SAFETY: `previous` stays allocated until the consumer has moved
        // past it, which cannot happen before its `next` link is set.
        unsafe { (*previous).next.store(node, Ordering::Release) };

        self.pending.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Takes the oldest event.
    ///
    /// A producer may have swapped the head without having linked its
    /// node yet; the pending count guarantees the link is imminent, so
    /// the consumer spins for it.
    unsafe fn pop(&self) -> E {
        loop {
            let tail = unsafe { *self.tail.get() };
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            if next.is_null() {
                hint::spin_loop();
                continue;
            }

            unsafe {
                *self.tail.get() = next;
                drop(Box::from_raw(tail));
            }

            if let Some(event) = unsafe { (*next).value.take() } {
                return event;
            }
        }
    }
}

impl<E> Drop for Funnel<E> {
    fn drop(&mut self) {
        let mut node = *self.tail.get_mut();

        while !node.is_null() {
            // SAFETY: `&mut self` means no producer or consumer is active.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Funnel;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    #[test]
    fn events_appended_while_processing_are_drained_in_order() {
        let funnel = Funnel::new();
        let seen = Mutex::new(Vec::new());

        funnel.submit(1, |event| {
            seen.lock().unwrap().push(event);
            if event == 1 {
                funnel.submit(2, |_| panic!("nested append must not process"));
                funnel.submit(3, |_| panic!("nested append must not process"));
            }
        });

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn only_one_processor_runs_at_a_time() {
        let funnel = Arc::new(Funnel::new());
        let active = Arc::new(AtomicBool::new(false));
        let handled = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let funnel = funnel.clone();
                let active = active.clone();
                let handled = handled.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..1_000 {
                        funnel.submit(i, |_| {
                            assert!(!active.swap(true, Ordering::AcqRel));
                            handled.fetch_add(1, Ordering::Relaxed);
                            active.store(false, Ordering::Release);
                        });
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(handled.load(Ordering::Relaxed), 4_000);
    }
}
