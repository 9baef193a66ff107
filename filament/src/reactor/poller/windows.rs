//! Windows socket syscall layer.
//!
//! Mirrors the Unix layer function for function. Sockets are created
//! overlapped-capable; the completion reactor issues every transfer on
//! them. The synchronous `sys_recv` is only used for reads that must not
//! wait, bounded by `sys_available` so it never blocks.

use crate::net::Family;

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Once;

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, AF_INET6, INVALID_SOCKET, IPPROTO_IPV6, IPV6_V6ONLY, SD_BOTH, SD_RECEIVE, SD_SEND,
    SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE,
    FIONREAD, SOCKET, SOCKET_ERROR, SOL_SOCKET, WSADATA, WSAEWOULDBLOCK, WSAStartup, accept,
    bind, closesocket, connect, getpeername, getsockname, getsockopt, ioctlsocket, listen, recv,
    send, setsockopt, shutdown, socket,
};

/// OS handle of a socket.
pub(crate) type RawHandle = SOCKET;

const BACKLOG: i32 = 128;

static WINSOCK_INIT: Once = Once::new();

/// Initialises Winsock 2.2 once per process.
pub(crate) fn ensure_winsock() {
    WINSOCK_INIT.call_once(|| unsafe {
        let mut data: WSADATA = mem::zeroed();
        let rc = WSAStartup(0x0202, &mut data);
        assert_eq!(rc, 0, "WSAStartup failed: {rc}");
    });
}

fn cvt(rc: i32) -> io::Result<i32> {
    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

pub(crate) fn domain(family: Family) -> i32 {
    match family {
        Family::V4 => AF_INET as i32,
        Family::V6 => AF_INET6 as i32,
    }
}

fn set_int_option(handle: RawHandle, level: i32, name: i32, value: i32) -> io::Result<()> {
    cvt(unsafe {
        setsockopt(
            handle,
            level,
            name,
            &value as *const i32 as *const u8,
            mem::size_of::<i32>() as i32,
        )
    })
    .map(drop)
}

pub(crate) fn sys_socket(family: Family) -> io::Result<RawHandle> {
    ensure_winsock();

    let handle = unsafe { socket(domain(family), SOCK_STREAM, 0) };
    if handle == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }

    Ok(handle)
}

pub(crate) fn sys_close(handle: RawHandle) {
    unsafe {
        closesocket(handle);
    }
}

pub(crate) fn sys_bind(handle: RawHandle, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt(unsafe { bind(handle, &storage as *const _ as *const SOCKADDR, len) }).map(drop)
}

pub(crate) fn sys_listen(handle: RawHandle) -> io::Result<()> {
    cvt(unsafe { listen(handle, BACKLOG) }).map(drop)
}

pub(crate) fn sys_accept(handle: RawHandle) -> io::Result<RawHandle> {
    let client = unsafe { accept(handle, std::ptr::null_mut(), std::ptr::null_mut()) };
    if client == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }

    Ok(client)
}

pub(crate) fn sys_connect(handle: RawHandle, addr: &SocketAddr) -> io::Result<bool> {
    let (storage, len) = socketaddr_to_storage(addr);
    let rc = unsafe { connect(handle, &storage as *const _ as *const SOCKADDR, len) };

    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(WSAEWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

pub(crate) fn sys_socket_error(handle: RawHandle) -> io::Result<()> {
    let mut err: i32 = 0;
    let mut len = mem::size_of::<i32>() as i32;

    cvt(unsafe {
        getsockopt(
            handle,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut i32 as *mut u8,
            &mut len,
        )
    })?;

    if err != 0 {
        Err(io::Error::from_raw_os_error(err))
    } else {
        Ok(())
    }
}

pub(crate) fn sys_recv(handle: RawHandle, buffer: &mut [u8]) -> io::Result<usize> {
    let len = buffer.len().min(i32::MAX as usize) as i32;
    cvt(unsafe { recv(handle, buffer.as_mut_ptr(), len, 0) }).map(|n| n as usize)
}

/// Number of bytes that can be received without blocking.
pub(crate) fn sys_available(handle: RawHandle) -> io::Result<usize> {
    let mut available: u32 = 0;
    cvt(unsafe { ioctlsocket(handle, FIONREAD, &mut available) })?;
    Ok(available as usize)
}

pub(crate) fn sys_send(handle: RawHandle, buffer: &[u8]) -> io::Result<usize> {
    let len = buffer.len().min(i32::MAX as usize) as i32;
    cvt(unsafe { send(handle, buffer.as_ptr(), len, 0) }).map(|n| n as usize)
}

pub(crate) fn sys_shutdown(handle: RawHandle, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SD_RECEIVE,
        Shutdown::Write => SD_SEND,
        Shutdown::Both => SD_BOTH,
    };

    cvt(unsafe { shutdown(handle, how) }).map(drop)
}

pub(crate) fn sys_sockname(handle: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

    cvt(unsafe { getsockname(handle, &mut storage as *mut _ as *mut SOCKADDR, &mut len) })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_peername(handle: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

    cvt(unsafe { getpeername(handle, &mut storage as *mut _ as *mut SOCKADDR, &mut len) })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_set_reuseaddr(handle: RawHandle) -> io::Result<()> {
    set_int_option(handle, SOL_SOCKET, SO_REUSEADDR, 1)
}

pub(crate) fn sys_set_dual_stack(handle: RawHandle) -> io::Result<()> {
    set_int_option(handle, IPPROTO_IPV6, IPV6_V6ONLY, 0)
}

/// Sets an option whose value is another socket handle, as required by
/// `SO_UPDATE_ACCEPT_CONTEXT`.
pub(crate) fn sys_set_handle_option(handle: RawHandle, name: i32, value: RawHandle) -> io::Result<()> {
    cvt(unsafe {
        setsockopt(
            handle,
            SOL_SOCKET,
            name,
            &value as *const RawHandle as *const u8,
            mem::size_of::<RawHandle>() as i32,
        )
    })
    .map(drop)
}

pub(crate) fn storage_to_socketaddr(storage: &SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    unsafe {
        match storage.ss_family {
            AF_INET => {
                let sin = &*(storage as *const _ as *const SOCKADDR_IN);
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.S_un.S_addr));

                Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }

            AF_INET6 => {
                let sin6 = &*(storage as *const _ as *const SOCKADDR_IN6);

                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.u.Byte),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.Anonymous.sin6_scope_id,
                )))
            }

            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported address family",
            )),
        }
    }
}

pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (SOCKADDR_STORAGE, i32) {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN) };
            sa.sin_family = AF_INET;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.S_un.S_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<SOCKADDR_IN>() as i32)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN6) };
            sa.sin6_family = AF_INET6;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.u.Byte = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.Anonymous.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<SOCKADDR_IN6>() as i32)
        }
    }
}
