//! Platform-specific I/O poller and syscall layer.
//!
//! On Unix the readiness reactor drives a poller selected at compile
//! time (`epoll` on Linux and Android, `kqueue` on the BSDs and macOS).
//! Windows has no poller: the completion reactor talks to an I/O
//! completion port directly.
//!
//! `platform` is the raw socket syscall layer used by every component
//! that touches an OS handle.

#[cfg(unix)]
pub(crate) mod common;

#[cfg(unix)]
pub(crate) use common::{Interest, Waker};

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;
