use crate::error::Result;
use crate::net::socket::Socket;
use crate::net::{Connection, Family};
use crate::reactor::poller::platform;
use crate::reactor::{IoRequest, Model, Notification, RawHandle, WaitToken};
use crate::runtime::{Handle, Scheduler};
use crate::utils::{Fired, Funnel, Signal};

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

type AcceptCallback = dyn Fn(Connection) + Send + Sync;

enum ListenEvent {
    Notified(Notification),
    Close,
}

struct Inner {
    scheduler: Scheduler,
    family: Family,
    local_addr: SocketAddr,
    socket: Mutex<Option<Arc<Socket>>>,
    token: Mutex<Option<WaitToken>>,
    callback: Arc<AcceptCallback>,
    funnel: Funnel<ListenEvent>,
    closed: Arc<Signal>,
}

/// A persistent accept loop.
///
/// Every accepted connection is handed to the callback on a worker, and
/// the next accept is armed as soon as the previous delivery has been
/// dispatched. The loop runs until [`close`](Self::close) is called;
/// dropping the `Listener` does not stop it.
pub struct Listener {
    inner: Arc<Inner>,
}

/// Listens on the wildcard address of `family`. An IPv6 listener also
/// accepts IPv4 clients where the platform allows it.
pub fn listen<F>(handle: &Handle, callback: F, port: u16, family: Family) -> Result<Listener>
where
    F: Fn(Connection) + Send + Sync + 'static,
{
    listen_on(handle, callback, SocketAddr::new(family.unspecified(), port))
}

/// Listens on a specific local address. Port `0` picks a free port; see
/// [`Listener::local_addr`].
pub fn listen_on<F>(handle: &Handle, callback: F, addr: SocketAddr) -> Result<Listener>
where
    F: Fn(Connection) + Send + Sync + 'static,
{
    let family = Family::of(&addr.ip());
    let socket = Socket::open(handle.reactor.clone(), family)?;

    platform::sys_set_reuseaddr(socket.handle())?;
    if family == Family::V6 {
        // Not every platform allows dual-stack sockets.
        let _ = platform::sys_set_dual_stack(socket.handle());
    }
    socket.bind(&addr)?;
    platform::sys_listen(socket.handle())?;

    let local_addr = socket.local_addr()?;
    let raw = socket.handle();
    let socket = Arc::new(socket);

    let inner = Arc::new(Inner {
        scheduler: handle.scheduler.clone(),
        family,
        local_addr,
        socket: Mutex::new(Some(socket.clone())),
        token: Mutex::new(None),
        callback: Arc::new(callback),
        funnel: Funnel::new(),
        closed: Arc::new(Signal::new()),
    });

    let listener = inner.clone();
    let token = socket.reactor().register_listener(
        raw,
        IoRequest::Accept { family },
        Arc::new(move |notification| listener.submit(ListenEvent::Notified(notification))),
    );
    *inner.token.lock().unwrap() = Some(token);

    debug!(%local_addr, "listening");

    Ok(Listener { inner })
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn family(&self) -> Family {
        self.inner.family
    }

    /// Stops accepting and releases the listening socket. Deliveries
    /// already dispatched still run. Idempotent.
    pub fn close(&self) {
        self.inner.submit(ListenEvent::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    /// Resolves once the listener has been closed.
    pub fn closed(&self) -> Fired {
        self.inner.closed.wait()
    }
}

impl Inner {
    fn submit(self: &Arc<Self>, event: ListenEvent) {
        self.funnel.submit(event, |event| self.handle(event));
    }

    fn handle(self: &Arc<Self>, event: ListenEvent) {
        match event {
            ListenEvent::Notified(notification) => self.on_notification(notification),
            ListenEvent::Close => self.shut(),
        }
    }

    fn shut(&self) {
        let socket = self.socket.lock().unwrap().take();
        let token = self.token.lock().unwrap().take();

        if let (Some(socket), Some(token)) = (&socket, token) {
            socket.reactor().deregister_listener(socket.handle(), token);
        }

        if self.closed.fire() {
            debug!(local_addr = %self.local_addr, "listener closed");
        }
    }

    fn on_notification(&self, notification: Notification) {
        let Some(socket) = self.socket.lock().unwrap().clone() else {
            if let Notification::Accepted(handle) = notification {
                platform::sys_close(handle);
            }
            return;
        };

        match notification {
            Notification::Ready if socket.reactor().model() == Model::Readiness => {
                self.accept_pending(&socket)
            }
            Notification::Accepted(handle) => self.deliver(&socket, handle),
            Notification::Failed(err) => warn!(local_addr = %self.local_addr, error = %err, "accept failed"),
            other => debug!(notification = ?other, "unexpected accept notification"),
        }
    }

    /// Accepts until the backlog is empty.
    fn accept_pending(&self, socket: &Arc<Socket>) {
        loop {
            match platform::sys_accept(socket.handle()) {
                Ok(handle) => self.deliver(socket, handle),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    // Typically EMFILE or a connection reset before accept.
                    warn!(local_addr = %self.local_addr, error = %err, "accept failed");
                    return;
                }
            }
        }
    }

    fn deliver(&self, listening: &Arc<Socket>, handle: RawHandle) {
        let socket = Socket::from_raw(listening.reactor().clone(), handle, self.family);
        let connection = Connection::new(socket);
        trace!(peer = ?connection.peer_addr(), "accepted");

        let callback = self.callback.clone();
        self.scheduler.dispatch(move || callback(connection));
    }
}
