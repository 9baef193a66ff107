//! BSD / macOS `kqueue` poller.
//!
//! Exposes the same surface as the `epoll` poller. Read and write
//! interest map to separate `EVFILT_READ` / `EVFILT_WRITE` filters; the
//! wake-up source is an `EVFILT_USER` event on the kqueue itself.

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER, EVFILT_WRITE,
    NOTE_TRIGGER, kevent, kqueue, timespec,
};
use std::io;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of the `EVFILT_USER` wake-up event.
const WAKE_IDENT: usize = 0;

pub(crate) struct KqueuePoller {
    kq: RawFd,
    events: Vec<libc::kevent>,
    waker: Arc<Waker>,
}

unsafe impl Send for KqueuePoller {}

fn change(ident: usize, filter: i16, flags: u16, fflags: u32, token: usize) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = ident as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.fflags = fflags as _;
    ev.udata = token as _;
    ev
}

fn apply(kq: RawFd, ev: &libc::kevent) -> io::Result<()> {
    let rc = unsafe { kevent(kq, ev, 1, ptr::null_mut(), 0, ptr::null()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Waker {
    /// Triggers the user event, interrupting a blocking `kevent`.
    pub(crate) fn wake(&self) {
        let ev = change(WAKE_IDENT, EVFILT_USER, 0, NOTE_TRIGGER, usize::MAX);
        let _ = apply(self.0, &ev);
    }
}

impl KqueuePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC);
        }

        let waker = Arc::new(Waker(kq));
        let ev = change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_CLEAR, 0, usize::MAX);
        apply(kq, &ev)?;

        Ok(Self {
            kq,
            events: Vec::with_capacity(256),
            waker,
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.reregister(fd, token, interest)
    }

    /// Adds or removes each filter to match `interest`.
    ///
    /// `EV_ADD` on an existing filter updates it; deleting a filter that
    /// was never added (or whose descriptor was closed) reports `ENOENT`,
    /// which is ignored.
    pub(crate) fn reregister(
        &self,
        fd: RawFd,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        for (filter, wanted) in [(EVFILT_READ, interest.read), (EVFILT_WRITE, interest.write)] {
            let flags = if wanted { EV_ADD } else { EV_DELETE };
            let ev = change(fd as usize, filter, flags, 0, token);

            match apply(self.kq, &ev) {
                Err(err) if !wanted && err.raw_os_error() == Some(libc::ENOENT) => {}
                other => other?,
            }
        }

        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            let ev = change(fd as usize, filter, EV_DELETE, 0, 0);
            let _ = apply(self.kq, &ev);
        }
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs() as _,
            tv_nsec: t.subsec_nanos() as _,
        });
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const timespec);

        events.clear();

        let n = unsafe {
            kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.filter == EVFILT_USER {
                continue;
            }

            let token = ev.udata as usize;
            let failed = ev.flags & (EV_EOF | EV_ERROR) != 0;
            let readable = ev.filter == EVFILT_READ;
            let writable = ev.filter == EVFILT_WRITE;

            if let Some(existing) = events.iter_mut().find(|e| e.token == token) {
                existing.readable |= readable || failed;
                existing.writable |= writable || failed;
            } else {
                events.push(Event {
                    token,
                    readable: readable || failed,
                    writable: writable || failed,
                });
            }
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(())
    }
}
