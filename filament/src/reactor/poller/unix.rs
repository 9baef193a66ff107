//! Unix socket syscall layer.
//!
//! Every socket created here is non-blocking and close-on-exec. Errors
//! are returned as `io::Error`; callers decide whether `WouldBlock` is
//! transient.

use crate::net::Family;

use libc::{
    AF_INET, AF_INET6, IPPROTO_IPV6, IPV6_V6ONLY, SHUT_RD, SHUT_RDWR, SHUT_WR, SO_ERROR,
    SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, c_int, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem};

/// OS handle of a socket.
pub(crate) type RawHandle = RawFd;

/// Backlog passed to `listen(2)`.
const BACKLOG: c_int = 128;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn domain(family: Family) -> c_int {
    match family {
        Family::V4 => AF_INET,
        Family::V6 => AF_INET6,
    }
}

fn set_int_option(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const c_int as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    })
    .map(drop)
}

/// Puts a descriptor into non-blocking, close-on-exec mode.
fn prepare(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = cvt(libc::fcntl(fd, libc::F_GETFL))?;
        cvt(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
        cvt(libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    set_int_option(fd, SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;

    Ok(())
}

/// Creates a non-blocking stream socket of the given family.
pub(crate) fn sys_socket(family: Family) -> io::Result<RawHandle> {
    let fd = cvt(unsafe { libc::socket(domain(family), SOCK_STREAM, 0) })?;

    if let Err(err) = prepare(fd) {
        sys_close(fd);
        return Err(err);
    }

    Ok(fd)
}

pub(crate) fn sys_close(fd: RawHandle) {
    unsafe {
        libc::close(fd);
    }
}

pub(crate) fn sys_bind(fd: RawHandle, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt(unsafe { libc::bind(fd, &storage as *const _ as *const sockaddr, len) }).map(drop)
}

pub(crate) fn sys_listen(fd: RawHandle) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd, BACKLOG) }).map(drop)
}

/// Accepts one pending connection. The new handle is prepared like a
/// freshly created socket.
pub(crate) fn sys_accept(fd: RawHandle) -> io::Result<RawHandle> {
    loop {
        let client = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };

        if client < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if let Err(err) = prepare(client) {
            sys_close(client);
            return Err(err);
        }

        return Ok(client);
    }
}

/// Starts a non-blocking connect.
///
/// Returns `Ok(true)` if the connection was established synchronously
/// and `Ok(false)` if it is in progress.
pub(crate) fn sys_connect(fd: RawHandle, addr: &SocketAddr) -> io::Result<bool> {
    let (storage, len) = socketaddr_to_storage(addr);
    let rc = unsafe { libc::connect(fd, &storage as *const _ as *const sockaddr, len) };

    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EINTR) | Some(libc::EALREADY) => Ok(false),
        _ if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
        _ => Err(err),
    }
}

/// Reads the pending error of a socket via `SO_ERROR`.
pub(crate) fn sys_socket_error(fd: RawHandle) -> io::Result<()> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    cvt(unsafe {
        libc::getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut c_int as *mut _,
            &mut len,
        )
    })?;

    if err != 0 {
        Err(io::Error::from_raw_os_error(err))
    } else {
        Ok(())
    }
}

/// Receives into `buffer`. `Ok(0)` means the peer closed its side.
pub(crate) fn sys_recv(fd: RawHandle, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) };

        if n >= 0 {
            return Ok(n as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) fn sys_send(fd: RawHandle, buffer: &[u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::send(fd, buffer.as_ptr() as *const _, buffer.len(), SEND_FLAGS) };

        if n >= 0 {
            return Ok(n as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) fn sys_shutdown(fd: RawHandle, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SHUT_RD,
        Shutdown::Write => SHUT_WR,
        Shutdown::Both => SHUT_RDWR,
    };

    cvt(unsafe { libc::shutdown(fd, how) }).map(drop)
}

pub(crate) fn sys_sockname(fd: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_peername(fd: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_set_reuseaddr(fd: RawHandle) -> io::Result<()> {
    set_int_option(fd, SOL_SOCKET, SO_REUSEADDR, 1)
}

/// Lets an IPv6 listener accept IPv4-mapped peers as well.
pub(crate) fn sys_set_dual_stack(fd: RawHandle) -> io::Result<()> {
    set_int_option(fd, IPPROTO_IPV6, IPV6_V6ONLY, 0)
}

/// Decodes an OS socket address.
pub(crate) fn storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(addr.sin_port))))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };

            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Encodes a socket address in its OS wire form.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
