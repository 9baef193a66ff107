//! Lifecycle states of a spawned task.

/// Not scheduled; waiting for a wake-up.
pub(crate) const IDLE: usize = 0;

/// Sitting in a run queue.
pub(crate) const QUEUED: usize = 1;

/// Being polled by exactly one worker.
pub(crate) const RUNNING: usize = 2;

/// Finished; the output (if any) waits in the result slot.
pub(crate) const COMPLETED: usize = 3;

/// Woken while running; re-queued once the current poll returns.
pub(crate) const NOTIFIED: usize = 4;
