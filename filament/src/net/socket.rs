use crate::net::Family;
use crate::reactor::poller::platform;
use crate::reactor::{RawHandle, Reactor};

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use tracing::trace;

/// One OS stream socket, bound to the reactor that multiplexes it.
///
/// The handle is closed when the socket is dropped and never reused
/// afterwards.
pub(crate) struct Socket {
    handle: RawHandle,
    family: Family,
    reactor: Arc<dyn Reactor>,
}

impl Socket {
    /// Creates a new non-blocking stream socket.
    pub(crate) fn open(reactor: Arc<dyn Reactor>, family: Family) -> io::Result<Self> {
        let handle = platform::sys_socket(family)?;
        Ok(Self::from_raw(reactor, handle, family))
    }

    /// Takes ownership of an accepted handle.
    pub(crate) fn from_raw(reactor: Arc<dyn Reactor>, handle: RawHandle, family: Family) -> Self {
        Self {
            handle,
            family,
            reactor,
        }
    }

    pub(crate) fn handle(&self) -> RawHandle {
        self.handle
    }

    pub(crate) fn reactor(&self) -> &Arc<dyn Reactor> {
        &self.reactor
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub(crate) fn bind(&self, addr: &SocketAddr) -> io::Result<()> {
        platform::sys_bind(self.handle, addr)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        platform::sys_sockname(self.handle)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        platform::sys_peername(self.handle)
    }

    pub(crate) fn shutdown(&self, how: Shutdown) {
        // Fails with ENOTCONN once the peer is gone; nothing to do then.
        let _ = platform::sys_shutdown(self.handle, how);
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        trace!(handle = ?self.handle, "socket closed");
        platform::sys_close(self.handle);
    }
}
