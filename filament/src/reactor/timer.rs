use super::TimerCallback;

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation handle of a scheduled timer.
#[derive(Clone, Debug, Default)]
pub(crate) struct TimerToken(Arc<AtomicBool>);

impl TimerToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Prevents the timer's callback from running if it has not been
    /// dispatched yet.
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// An entry in the reactor timer queue.
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) callback: TimerCallback,
    pub(crate) token: TimerToken,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    /// Reversed so that `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered timer queue owned by a reactor thread.
#[derive(Default)]
pub(crate) struct Timers {
    heap: BinaryHeap<TimerEntry>,
}

impl Timers {
    pub(crate) fn push(&mut self, entry: TimerEntry) {
        self.heap.push(entry);
    }

    /// Time until the earliest live deadline, if any.
    pub(crate) fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        while let Some(entry) = self.heap.peek() {
            if !entry.token.is_cancelled() {
                return Some(entry.deadline.saturating_duration_since(now));
            }
            self.heap.pop();
        }

        None
    }

    /// Removes and returns the callbacks of every expired, live timer.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut due = Vec::new();

        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            match self.heap.pop() {
                Some(entry) if !entry.token.is_cancelled() => due.push(entry.callback),
                _ => {}
            }
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerEntry, TimerToken, Timers};

    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[test]
    fn expired_timers_fire_in_deadline_order_and_skip_cancelled() {
        let mut timers = Timers::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let now = Instant::now();

        let cancelled = TimerToken::new();
        for (offset, tag, token) in [
            (30, 3, TimerToken::new()),
            (10, 1, TimerToken::new()),
            (20, 2, cancelled.clone()),
        ] {
            let order = order.clone();
            timers.push(TimerEntry {
                deadline: now + Duration::from_millis(offset),
                callback: Box::new(move || order.lock().unwrap().push(tag)),
                token,
            });
        }
        cancelled.cancel();

        assert_eq!(timers.next_timeout(now), Some(Duration::from_millis(10)));

        for callback in timers.expired(now + Duration::from_millis(40)) {
            callback();
        }

        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
        assert_eq!(timers.next_timeout(now), None);
    }
}
