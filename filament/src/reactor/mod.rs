//! Socket readiness / completion multiplexer.
//!
//! The reactor turns OS notifications into callbacks dispatched on the
//! scheduler's workers. Two backends sit behind the [`Reactor`] trait:
//!
//! - [`ReadinessReactor`] (epoll, kqueue) reports "this handle can be
//!   read or written now". The caller performs the non-blocking syscall
//!   itself, and is expected to try it once before registering.
//! - `CompletionReactor` (I/O completion ports) performs the transfer
//!   described by the [`IoRequest`] and reports its outcome.
//!
//! # Issuing context
//!
//! On the completion backend an in-flight overlapped operation is
//! cancelled by the OS when the thread that issued it exits. Every
//! operation is therefore issued on the reactor's own thread, never on
//! the caller's. Callers describe the step with an [`IoRequest`] and
//! must not perform the syscall themselves; the backend owns the
//! transfer buffers until the OS has released them, so an aborted
//! operation never writes into memory the caller has reclaimed.
//!
//! # Delivery
//!
//! One-shot waits fire at most once and deregister themselves. Listener
//! registrations fire once per readiness event until deregistered. A
//! waiter aborted before its event fired never has its callback
//! invoked; a delivery already handed to the scheduler is not revoked.

mod timer;

#[cfg(unix)]
mod command;
#[cfg(unix)]
mod event;
#[cfg(unix)]
mod readiness;

#[cfg(windows)]
mod completion;

pub(crate) mod poller;

pub(crate) use poller::platform::RawHandle;
pub(crate) use timer::TimerToken;

#[cfg(unix)]
pub(crate) use readiness::ReadinessReactor;

#[cfg(windows)]
pub(crate) use completion::CompletionReactor;

use crate::net::Family;
use crate::runtime::Scheduler;

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Which notification model a backend implements.
#[cfg_attr(unix, allow(dead_code))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Model {
    Readiness,
    Completion,
}

/// The I/O step a wait stands for.
///
/// Readiness backends ignore the payload. Completion backends perform
/// the step and report its [`Notification`].
#[cfg_attr(unix, allow(dead_code))]
pub(crate) enum IoRequest {
    /// Plain readiness; completion backends report `Ready` once the
    /// handle has data (zero-byte receive) or immediately for writes.
    Poll,

    /// Receive up to `len` bytes.
    Recv { len: usize },

    /// Send the given bytes.
    Send(Bytes),

    /// Connect an already bound socket.
    Connect(SocketAddr),

    /// Accept one connection on a listening socket of `family`.
    Accept { family: Family },
}

/// Outcome delivered to a wait callback.
#[cfg_attr(unix, allow(dead_code))]
#[derive(Debug)]
pub(crate) enum Notification {
    /// The handle is ready; perform the syscall now.
    Ready,

    /// Bytes received by the backend. Empty means end of stream.
    Received(Bytes),

    /// Number of bytes the backend sent.
    Sent(usize),

    Connected,

    /// A connection accepted by the backend.
    Accepted(RawHandle),

    Failed(io::Error),
}

/// Identifies one outstanding wait or listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WaitToken(pub(crate) u64);

pub(crate) type Callback = Box<dyn FnOnce(Notification) + Send>;
pub(crate) type ListenCallback = Arc<dyn Fn(Notification) + Send + Sync>;
pub(crate) type TimerCallback = Box<dyn FnOnce() + Send>;

/// Common interface of the readiness and completion backends.
pub(crate) trait Reactor: Send + Sync {
    fn model(&self) -> Model;

    /// Registers a one-shot wait for readability (or for completion of a
    /// receive / accept on the completion backend).
    fn wait_readable(&self, handle: RawHandle, request: IoRequest, callback: Callback)
    -> WaitToken;

    /// Registers a one-shot wait for writability (or for completion of a
    /// send / connect on the completion backend).
    fn wait_writable(&self, handle: RawHandle, request: IoRequest, callback: Callback)
    -> WaitToken;

    /// Registers a persistent readability listener.
    ///
    /// The listener is disarmed while its callback runs and re-armed once
    /// the callback returns, so deliveries for one handle never overlap.
    fn register_listener(
        &self,
        handle: RawHandle,
        request: IoRequest,
        callback: ListenCallback,
    ) -> WaitToken;

    fn deregister_listener(&self, handle: RawHandle, token: WaitToken);

    /// Removes a one-shot wait before it fires.
    fn abort_waiter(&self, token: WaitToken);

    /// Runs `callback` on a worker once `deadline` has passed, unless the
    /// returned token is cancelled first.
    fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerToken;

    /// Stops the reactor thread. Pending waits are dropped.
    fn shutdown(&self);
}

/// Starts the default backend for this platform.
pub(crate) fn start(scheduler: Scheduler) -> io::Result<Arc<dyn Reactor>> {
    #[cfg(unix)]
    {
        Ok(ReadinessReactor::start(scheduler)?)
    }

    #[cfg(windows)]
    {
        Ok(CompletionReactor::start(scheduler)?)
    }
}
