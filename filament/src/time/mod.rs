//! Timers built on reactor deadlines.
//!
//! - [`sleep`] and [`sleep_with`] for one-off delays,
//! - [`timeout`] for bounding a future,
//! - [`Timer`] for restartable expiries such as inactivity timeouts.

mod sleep;
mod timeout;
mod timer;

#[doc(inline)]
pub use sleep::{Sleep, sleep, sleep_until, sleep_with};

#[doc(inline)]
pub use timeout::{Elapsed, Timeout, timeout, timeout_with};

#[doc(inline)]
pub use timer::Timer;
