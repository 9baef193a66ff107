//! Worker threads of the executor.
//!
//! Each [`worker`] drains its own queue first, then the scheduler's
//! injector, then its peers' queues, and parks when all are empty.

pub(crate) mod worker;
