use super::Runtime;

use std::io;
use std::thread;

/// Builder for configuring and creating a runtime.
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new()
///     .worker_threads(4)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    worker_threads: usize,
}

impl RuntimeBuilder {
    /// Creates a builder with one worker per logical CPU, falling back to
    /// `1` if the count is unavailable.
    pub fn new() -> Self {
        let worker_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self { worker_threads }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = n;
        self
    }

    /// Starts the reactor and the worker pool.
    pub fn build(self) -> io::Result<Runtime> {
        Runtime::new(self.worker_threads)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
