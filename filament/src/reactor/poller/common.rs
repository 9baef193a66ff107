use std::os::fd::RawFd;

/// Readiness a registration is interested in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Wake-up source used to interrupt a blocking poll.
///
/// On Linux this wraps an `eventfd`; on kqueue platforms it wraps the
/// kqueue descriptor itself and triggers an `EVFILT_USER` event. The
/// descriptor is closed when the last reference goes away, which may
/// outlive the poller.
pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}
