//! Worker pool and scheduling.
//!
//! A [`Runtime`] owns one reactor thread and a pool of worker threads.
//! The reactor never runs user code: every notification it produces is
//! handed to the [`Scheduler`], which runs it on a worker. Spawned
//! futures go through the same queues.
//!
//! Most code reaches the runtime through [`Handle::current`] and
//! [`task::spawn`].

mod core;
mod executor;
mod handle;
mod scheduler;
mod work_stealing;

pub(crate) mod builder;
pub(crate) mod context;

pub mod task;

pub use builder::RuntimeBuilder;
pub use core::Runtime;
pub use handle::Handle;
pub use scheduler::Scheduler;
