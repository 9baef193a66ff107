use super::poller::platform::{self, RawHandle};
use super::timer::{TimerEntry, TimerToken, Timers};
use super::{
    Callback, IoRequest, ListenCallback, Model, Notification, Reactor, TimerCallback, WaitToken,
};
use crate::net::Family;
use crate::runtime::Scheduler;

use bytes::Bytes;
use std::collections::HashMap;
use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::{
    LPFN_ACCEPTEX, LPFN_CONNECTEX, SIO_GET_EXTENSION_FUNCTION_POINTER, SO_UPDATE_ACCEPT_CONTEXT,
    SO_UPDATE_CONNECT_CONTEXT, SOCKADDR, SOCKADDR_STORAGE, SOCKET_ERROR, WSA_IO_PENDING, WSABUF,
    WSAGetOverlappedResult, WSAID_ACCEPTEX, WSAID_CONNECTEX, WSAIoctl, WSARecv, WSASend,
};
use windows_sys::Win32::System::IO::{
    CancelIoEx, CreateIoCompletionPort, GetQueuedCompletionStatusEx, OVERLAPPED, OVERLAPPED_ENTRY,
    PostQueuedCompletionStatus,
};

/// Completion key of wake-up packets.
const WAKE_KEY: usize = usize::MAX;

/// Size of one address slot in an `AcceptEx` output buffer.
const ACCEPT_ADDRESS_LEN: usize = mem::size_of::<SOCKADDR_STORAGE>() + 16;

/// How long shutdown waits for cancelled operations to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// An owned I/O completion port handle.
struct Port(HANDLE);

unsafe impl Send for Port {}
unsafe impl Sync for Port {}

impl Port {
    fn new() -> io::Result<Self> {
        let handle = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 1) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }

        Ok(Self(handle))
    }

    fn wake(&self) {
        unsafe {
            PostQueuedCompletionStatus(self.0, 0, WAKE_KEY, ptr::null());
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Who receives an operation's outcome.
enum Delivery {
    Once(Callback),
    Listener(ListenCallback),
}

enum Command {
    Start {
        handle: RawHandle,
        token: WaitToken,
        request: IoRequest,
        writable: bool,
        delivery: Delivery,
    },
    Abort {
        token: WaitToken,
    },
    Unlisten {
        token: WaitToken,
    },
    Rearm {
        token: WaitToken,
    },
    SetTimer {
        deadline: Instant,
        callback: TimerCallback,
        token: TimerToken,
    },
    Shutdown,
}

/// Completion backend over an I/O completion port.
///
/// Every overlapped operation is issued by the reactor thread, which
/// outlives all of them; the operation record, including its buffer, is
/// owned by that thread until the port reports the operation finished.
pub(crate) struct CompletionReactor {
    port: Arc<Port>,
    sender: Mutex<Sender<Command>>,
    next_token: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionReactor {
    pub(crate) fn start(scheduler: Scheduler) -> io::Result<Arc<Self>> {
        platform::ensure_winsock();

        let port = Arc::new(Port::new()?);
        let (sender, receiver) = channel();

        let core = Core {
            port: port.clone(),
            receiver,
            sender: sender.clone(),
            pending: HashMap::new(),
            listeners: HashMap::new(),
            timers: Timers::default(),
            connect_ex: None,
            accept_ex: None,
            scheduler,
        };

        let thread = thread::Builder::new()
            .name("filament-reactor".into())
            .spawn(move || core.run())?;

        debug!("completion reactor started");

        Ok(Arc::new(Self {
            port,
            sender: Mutex::new(sender),
            next_token: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        }))
    }

    fn send(&self, command: Command) {
        let _ = self.sender.lock().unwrap().send(command);
        self.port.wake();
    }

    fn start_op(
        &self,
        handle: RawHandle,
        request: IoRequest,
        writable: bool,
        delivery: Delivery,
    ) -> WaitToken {
        let token = WaitToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Start {
            handle,
            token,
            request,
            writable,
            delivery,
        });
        token
    }
}

impl Reactor for CompletionReactor {
    fn model(&self) -> Model {
        Model::Completion
    }

    fn wait_readable(&self, handle: RawHandle, request: IoRequest, callback: Callback) -> WaitToken {
        self.start_op(handle, request, false, Delivery::Once(callback))
    }

    fn wait_writable(&self, handle: RawHandle, request: IoRequest, callback: Callback) -> WaitToken {
        self.start_op(handle, request, true, Delivery::Once(callback))
    }

    fn register_listener(
        &self,
        handle: RawHandle,
        request: IoRequest,
        callback: ListenCallback,
    ) -> WaitToken {
        self.start_op(handle, request, false, Delivery::Listener(callback))
    }

    fn deregister_listener(&self, _: RawHandle, token: WaitToken) {
        self.send(Command::Unlisten { token });
    }

    fn abort_waiter(&self, token: WaitToken) {
        self.send(Command::Abort { token });
    }

    fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerToken {
        let token = TimerToken::new();
        self.send(Command::SetTimer {
            deadline,
            callback,
            token: token.clone(),
        });
        token
    }

    fn shutdown(&self) {
        self.send(Command::Shutdown);

        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }

        debug!("completion reactor stopped");
    }
}

/// The step an operation record stands for.
enum Kind {
    Poll,
    Recv,
    Send,
    Connect,
    Accept { socket: RawHandle },
}

/// One overlapped operation. `overlapped` must stay the first field: the
/// port hands back a pointer to it.
#[repr(C)]
struct Operation {
    overlapped: OVERLAPPED,
    token: WaitToken,
    handle: RawHandle,
    kind: Kind,
    buffer: Vec<u8>,
    payload: Bytes,
}

struct Pending {
    op: Box<Operation>,
    delivery: Option<Delivery>,
}

/// A persistent accept registration.
struct Listening {
    handle: RawHandle,
    family: Family,
    callback: ListenCallback,
}

struct Core {
    port: Arc<Port>,
    receiver: Receiver<Command>,
    sender: Sender<Command>,

    pending: HashMap<WaitToken, Pending>,
    listeners: HashMap<WaitToken, Listening>,
    timers: Timers,

    connect_ex: LPFN_CONNECTEX,
    accept_ex: LPFN_ACCEPTEX,

    scheduler: Scheduler,
}

impl Core {
    fn run(mut self) {
        let mut entries: Vec<OVERLAPPED_ENTRY> = Vec::with_capacity(64);

        loop {
            loop {
                match self.receiver.try_recv() {
                    Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                        self.drain();
                        return;
                    }
                    Ok(command) => self.apply(command),
                    Err(TryRecvError::Empty) => break,
                }
            }

            let timeout = self
                .timers
                .next_timeout(Instant::now())
                .map(|t| t.as_micros().div_ceil(1000).min(u32::MAX as u128 - 1) as u32)
                .unwrap_or(u32::MAX);

            if let Err(err) = self.wait(&mut entries, timeout) {
                error!(%err, "completion port failed, reactor exiting");
                self.drain();
                return;
            }

            for entry in entries.drain(..) {
                self.complete(entry);
            }

            for callback in self.timers.expired(Instant::now()) {
                self.scheduler.dispatch(callback);
            }
        }
    }

    fn wait(&self, entries: &mut Vec<OVERLAPPED_ENTRY>, timeout: u32) -> io::Result<()> {
        let mut removed = 0u32;

        let ok = unsafe {
            GetQueuedCompletionStatusEx(
                self.port.0,
                entries.as_mut_ptr(),
                entries.capacity() as u32,
                &mut removed,
                timeout,
                0,
            )
        };

        if ok == 0 {
            let err = io::Error::last_os_error();
            // WAIT_TIMEOUT
            if err.raw_os_error() == Some(258) {
                return Ok(());
            }
            return Err(err);
        }

        unsafe { entries.set_len(removed as usize) };
        Ok(())
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Start {
                handle,
                token,
                request,
                writable,
                delivery,
            } => {
                if let (Delivery::Listener(callback), IoRequest::Accept { family }) =
                    (&delivery, &request)
                {
                    self.listeners.insert(
                        token,
                        Listening {
                            handle,
                            family: *family,
                            callback: callback.clone(),
                        },
                    );
                }

                self.start(handle, token, request, writable, delivery);
            }

            Command::Abort { token } => self.cancel(token),

            Command::Unlisten { token } => {
                self.listeners.remove(&token);
                self.cancel(token);
            }

            Command::Rearm { token } => {
                if let Some(listener) = self.listeners.get(&token) {
                    let handle = listener.handle;
                    let request = IoRequest::Accept {
                        family: listener.family,
                    };
                    let delivery = Delivery::Listener(listener.callback.clone());

                    self.start(handle, token, request, false, delivery);
                }
            }

            Command::SetTimer {
                deadline,
                callback,
                token,
            } => self.timers.push(TimerEntry {
                deadline,
                callback,
                token,
            }),

            Command::Shutdown => {}
        }
    }

    /// Cancels the operation behind `token`. Its completion still
    /// arrives, carrying `ERROR_OPERATION_ABORTED`, and is then dropped.
    fn cancel(&mut self, token: WaitToken) {
        if let Some(pending) = self.pending.get_mut(&token) {
            pending.delivery = None;

            unsafe {
                CancelIoEx(pending.op.handle as HANDLE, &pending.op.overlapped);
            }

            trace!(?token, "operation cancelled");
        }
    }

    /// Binds `handle` to the port. A handle can only be bound once; a
    /// second attempt fails with `ERROR_INVALID_PARAMETER`, which means it
    /// is already ours.
    fn associate(&self, handle: RawHandle) -> io::Result<()> {
        let port = unsafe { CreateIoCompletionPort(handle as HANDLE, self.port.0, 0, 0) };

        if port.is_null() {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(87) {
                return Err(err);
            }
        }

        Ok(())
    }

    fn start(
        &mut self,
        handle: RawHandle,
        token: WaitToken,
        request: IoRequest,
        writable: bool,
        delivery: Delivery,
    ) {
        if writable && matches!(request, IoRequest::Poll) {
            self.deliver(token, delivery, Notification::Ready);
            return;
        }

        if let Err(err) = self.associate(handle) {
            self.deliver(token, delivery, Notification::Failed(err));
            return;
        }

        let mut op = Box::new(Operation {
            overlapped: unsafe { mem::zeroed() },
            token,
            handle,
            kind: Kind::Poll,
            buffer: Vec::new(),
            payload: Bytes::new(),
        });

        let issued = match request {
            IoRequest::Poll => self.issue_recv(&mut op),
            IoRequest::Recv { len } => {
                op.kind = Kind::Recv;
                op.buffer = vec![0; len];
                self.issue_recv(&mut op)
            }
            IoRequest::Send(bytes) => {
                op.kind = Kind::Send;
                op.payload = bytes;
                self.issue_send(&mut op)
            }
            IoRequest::Connect(addr) => {
                op.kind = Kind::Connect;
                self.issue_connect(&mut op, &addr)
            }
            IoRequest::Accept { family } => self.issue_accept(&mut op, family),
        };

        match issued {
            Ok(()) => {
                trace!(handle, ?token, "operation issued");
                self.pending.insert(
                    token,
                    Pending {
                        op,
                        delivery: Some(delivery),
                    },
                );
            }
            Err(err) => {
                if let Kind::Accept { socket } = op.kind {
                    platform::sys_close(socket);
                }
                self.deliver(token, delivery, Notification::Failed(err));
            }
        }
    }

    fn issue_recv(&self, op: &mut Operation) -> io::Result<()> {
        let buf = WSABUF {
            len: op.buffer.len() as u32,
            buf: op.buffer.as_mut_ptr(),
        };
        let mut flags = 0u32;

        let rc = unsafe {
            WSARecv(
                op.handle,
                &buf,
                1,
                ptr::null_mut(),
                &mut flags,
                &mut op.overlapped,
                None,
            )
        };

        pending_or_done(rc != SOCKET_ERROR)
    }

    fn issue_send(&self, op: &mut Operation) -> io::Result<()> {
        let buf = WSABUF {
            len: op.payload.len() as u32,
            buf: op.payload.as_ptr() as *mut u8,
        };

        let rc = unsafe {
            WSASend(
                op.handle,
                &buf,
                1,
                ptr::null_mut(),
                0,
                &mut op.overlapped,
                None,
            )
        };

        pending_or_done(rc != SOCKET_ERROR)
    }

    fn issue_connect(&mut self, op: &mut Operation, addr: &std::net::SocketAddr) -> io::Result<()> {
        if self.connect_ex.is_none() {
            self.connect_ex = unsafe { load_extension(op.handle, &WSAID_CONNECTEX)? };
        }
        let connect_ex = self
            .connect_ex
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "ConnectEx unavailable"))?;

        let (storage, len) = platform::socketaddr_to_storage(addr);

        let ok = unsafe {
            connect_ex(
                op.handle,
                &storage as *const _ as *const SOCKADDR,
                len,
                ptr::null(),
                0,
                ptr::null_mut(),
                &mut op.overlapped,
            )
        };

        pending_or_done(ok != 0)
    }

    fn issue_accept(&mut self, op: &mut Operation, family: Family) -> io::Result<()> {
        if self.accept_ex.is_none() {
            self.accept_ex = unsafe { load_extension(op.handle, &WSAID_ACCEPTEX)? };
        }
        let accept_ex = self
            .accept_ex
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "AcceptEx unavailable"))?;

        let socket = platform::sys_socket(family)?;
        op.kind = Kind::Accept { socket };
        op.buffer = vec![0; 2 * ACCEPT_ADDRESS_LEN];

        let mut received = 0u32;
        let ok = unsafe {
            accept_ex(
                op.handle,
                socket,
                op.buffer.as_mut_ptr() as *mut c_void,
                0,
                ACCEPT_ADDRESS_LEN as u32,
                ACCEPT_ADDRESS_LEN as u32,
                &mut received,
                &mut op.overlapped,
            )
        };

        pending_or_done(ok != 0)
    }

    /// Handles one dequeued completion packet.
    fn complete(&mut self, entry: OVERLAPPED_ENTRY) {
        if entry.lpCompletionKey == WAKE_KEY || entry.lpOverlapped.is_null() {
            return;
        }

        let token = unsafe { (*(entry.lpOverlapped as *const Operation)).token };
        let Some(pending) = self.pending.remove(&token) else {
            warn!(?token, "completion for unknown operation");
            return;
        };

        let mut op = pending.op;
        let result = overlapped_result(&op);

        let Some(delivery) = pending.delivery else {
            if let Kind::Accept { socket } = op.kind {
                platform::sys_close(socket);
            }
            trace!(?token, "aborted operation drained");
            return;
        };

        let notification = match (result, &op.kind) {
            (Err(err), Kind::Accept { socket }) => {
                platform::sys_close(*socket);
                Notification::Failed(err)
            }
            (Err(err), _) => Notification::Failed(err),
            (Ok(_), Kind::Poll) => Notification::Ready,
            (Ok(n), Kind::Recv) => {
                let mut buffer = mem::take(&mut op.buffer);
                buffer.truncate(n);
                Notification::Received(Bytes::from(buffer))
            }
            (Ok(n), Kind::Send) => Notification::Sent(n),
            (Ok(_), Kind::Connect) => {
                let _ = platform::sys_set_handle_option(op.handle, SO_UPDATE_CONNECT_CONTEXT, 0);
                Notification::Connected
            }
            (Ok(_), Kind::Accept { socket }) => {
                let _ =
                    platform::sys_set_handle_option(*socket, SO_UPDATE_ACCEPT_CONTEXT, op.handle);
                Notification::Accepted(*socket)
            }
        };

        self.deliver(token, delivery, notification);
    }

    fn deliver(&self, token: WaitToken, delivery: Delivery, notification: Notification) {
        match delivery {
            Delivery::Once(callback) => {
                self.scheduler.dispatch(move || callback(notification));
            }
            Delivery::Listener(callback) => {
                let sender = self.sender.clone();
                let port = self.port.clone();

                self.scheduler.dispatch(move || {
                    callback(notification);
                    let _ = sender.send(Command::Rearm { token });
                    port.wake();
                });
            }
        }
    }

    /// Cancels every outstanding operation and waits for the port to
    /// release them. Records the OS never released are leaked rather
    /// than freed under it.
    fn drain(&mut self) {
        self.listeners.clear();

        let tokens: Vec<WaitToken> = self.pending.keys().copied().collect();
        for token in tokens {
            self.cancel(token);
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let mut entries: Vec<OVERLAPPED_ENTRY> = Vec::with_capacity(64);

        while !self.pending.is_empty() && Instant::now() < deadline {
            if self.wait(&mut entries, 50).is_err() {
                break;
            }

            for entry in entries.drain(..) {
                if entry.lpOverlapped.is_null() {
                    continue;
                }

                let token = unsafe { (*(entry.lpOverlapped as *const Operation)).token };
                if let Some(pending) = self.pending.remove(&token) {
                    if let Kind::Accept { socket } = pending.op.kind {
                        platform::sys_close(socket);
                    }
                }
            }
        }

        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "leaking operations not released by the OS"
            );
            for (_, pending) in self.pending.drain() {
                mem::forget(pending.op);
            }
        }
    }
}

/// Maps the immediate result of an overlapped call. Both synchronous
/// success and `WSA_IO_PENDING` still produce a completion packet.
fn pending_or_done(succeeded: bool) -> io::Result<()> {
    if succeeded {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(WSA_IO_PENDING) {
        Ok(())
    } else {
        Err(err)
    }
}

fn overlapped_result(op: &Operation) -> io::Result<usize> {
    let mut transferred = 0u32;
    let mut flags = 0u32;

    let ok = unsafe {
        WSAGetOverlappedResult(op.handle, &op.overlapped, &mut transferred, 0, &mut flags)
    };

    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(transferred as usize)
    }
}

/// Loads a Winsock extension function such as `ConnectEx`.
unsafe fn load_extension<F>(handle: RawHandle, guid: &windows_sys::core::GUID) -> io::Result<Option<F>>
where
    F: Copy,
{
    let mut function: Option<F> = None;
    let mut returned = 0u32;

    let rc = unsafe {
        WSAIoctl(
            handle,
            SIO_GET_EXTENSION_FUNCTION_POINTER,
            guid as *const _ as *const c_void,
            mem::size_of::<windows_sys::core::GUID>() as u32,
            &mut function as *mut _ as *mut c_void,
            mem::size_of::<Option<F>>() as u32,
            &mut returned,
            ptr::null_mut(),
            None,
        )
    };

    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(function)
    }
}
