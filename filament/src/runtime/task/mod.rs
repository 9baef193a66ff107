//! Spawned tasks and dispatched callbacks.
//!
//! Most code reaches this module through [`spawn`] and the
//! [`JoinHandle`] it returns; the executor works with the [`Runnable`]
//! trait, implemented by both futures ([`Task`]) and plain callbacks
//! ([`Job`]).

mod core;
mod handle;
mod state;

pub(crate) use core::{Job, Runnable, Task};
pub use handle::JoinHandle;

use crate::runtime::Handle;

use std::future::Future;

/// Spawns a future onto the current runtime.
///
/// Inside a worker this is the runtime the worker belongs to; elsewhere
/// it is the process-wide default runtime (see [`Handle::current`]).
pub fn spawn<F, T>(future: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    Handle::current().spawn(future)
}
