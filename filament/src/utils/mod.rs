//! Internal building blocks shared by the reactor and the network layer.
//!
//! - [`Slab`]: indexed storage with reuse of freed slots.
//! - [`Funnel`]: the single-active-processor event funnel that serialises
//!   completions and aborts for readers, writers, connecters and listeners.
//! - [`AbortState`]: the two-bit cancellation state resolving the
//!   abort-versus-in-flight race.
//! - one-shot [`completion`]s and multi-waiter [`Signal`]s bridging
//!   callbacks to futures.

mod abort;
mod completion;
mod funnel;
mod signal;
mod slab;

pub(crate) use abort::AbortState;
pub(crate) use completion::{Completer, Completion, completion};
pub(crate) use funnel::Funnel;
pub(crate) use signal::Signal;
pub use signal::Fired;
pub(crate) use slab::Slab;
