use super::timer::TimerToken;
use super::{Callback, ListenCallback, RawHandle, TimerCallback, WaitToken};

use std::time::Instant;

/// Direction of a one-shot wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Requests sent from any thread to the readiness reactor thread.
pub(crate) enum Command {
    Wait {
        handle: RawHandle,
        direction: Direction,
        token: WaitToken,
        callback: Callback,
    },
    Listen {
        handle: RawHandle,
        token: WaitToken,
        callback: ListenCallback,
    },
    Unlisten {
        handle: RawHandle,
        token: WaitToken,
    },
    /// Re-enables a listener after its callback has returned.
    Rearm {
        token: WaitToken,
    },
    Abort {
        token: WaitToken,
    },
    SetTimer {
        deadline: Instant,
        callback: TimerCallback,
        token: TimerToken,
    },
    Shutdown,
}
