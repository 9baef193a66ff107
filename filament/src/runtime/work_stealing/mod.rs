//! Run queues of the work-stealing scheduler: one global [`injector`]
//! and one [`queue`] per worker.

pub(crate) mod injector;
pub(crate) mod queue;
