use crate::net::socket::Socket;
use crate::net::{Address, Connection, Family};
use crate::reactor::poller::platform;
use crate::reactor::{IoRequest, Model, Notification, Reactor, WaitToken};
use crate::runtime::Handle;
use crate::utils::{AbortState, Completer, Completion, Funnel, completion};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tracing::{debug, trace};

enum ConnectEvent {
    Start,
    Notified(Notification),
    Cancel,
}

struct Attempt {
    /// Index of the candidate being tried.
    next: usize,
    socket: Option<Socket>,
    attempts: usize,
    completer: Option<Completer<Option<Connection>>>,
}

struct Inner {
    reactor: Arc<dyn Reactor>,
    candidates: Vec<SocketAddr>,
    state: AbortState,
    token: Mutex<Option<WaitToken>>,
    funnel: Funnel<ConnectEvent>,
    attempt: Mutex<Attempt>,
}

/// An outbound connection attempt across an ordered candidate list.
///
/// Resolves to the first candidate that accepts, or to `None` once every
/// candidate has been tried exactly once. Failure is a value: nothing is
/// retried beyond the list.
///
/// Dropping the future does not stop the attempt; [`cancel`](Self::cancel)
/// does.
pub struct Connecter {
    inner: Arc<Inner>,
    completion: Completion<Option<Connection>>,
}

/// Connects to the first reachable candidate. Each candidate's host is
/// combined with `port`.
pub fn connect(handle: &Handle, addresses: &[Address], port: u16) -> Connecter {
    let candidates = addresses
        .iter()
        .map(|address| address.with_port(port).to_socket_addr())
        .collect();

    Connecter::start(handle, candidates)
}

/// Connects to a single address.
pub fn connect_one(handle: &Handle, address: Address, port: u16) -> Connecter {
    connect(handle, &[address], port)
}

impl Connecter {
    fn start(handle: &Handle, candidates: Vec<SocketAddr>) -> Self {
        let (completer, completion) = completion();

        let inner = Arc::new(Inner {
            reactor: handle.reactor.clone(),
            candidates,
            state: AbortState::new(),
            token: Mutex::new(None),
            funnel: Funnel::new(),
            attempt: Mutex::new(Attempt {
                next: 0,
                socket: None,
                attempts: 0,
                completer: Some(completer),
            }),
        });

        inner.submit(ConnectEvent::Start);

        Self { inner, completion }
    }

    /// Aborts the outstanding wait and completes with `None`, unless the
    /// attempt has already completed.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Number of candidates tried so far.
    pub fn attempts(&self) -> usize {
        self.inner.attempt.lock().unwrap().attempts
    }
}

impl Future for Connecter {
    type Output = Option<Connection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Connection>> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

impl Inner {
    fn submit(self: &Arc<Self>, event: ConnectEvent) {
        self.funnel.submit(event, |event| self.handle(event));
    }

    fn cancel(self: &Arc<Self>) {
        if self.state.request_abort() {
            if let Some(token) = *self.token.lock().unwrap() {
                self.reactor.abort_waiter(token);
            }
        }

        self.submit(ConnectEvent::Cancel);
    }

    fn handle(self: &Arc<Self>, event: ConnectEvent) {
        match event {
            ConnectEvent::Start => self.try_next(),
            ConnectEvent::Notified(notification) => {
                self.state.settle();
                self.token.lock().unwrap().take();

                if self.state.is_aborted() {
                    return;
                }

                self.on_notification(notification);
            }
            ConnectEvent::Cancel => {
                debug!("connect cancelled");
                self.complete(None);
            }
        }
    }

    /// Tries candidates in order until one is pending or connected, or
    /// the list is exhausted.
    fn try_next(self: &Arc<Self>) {
        loop {
            if self.state.is_aborted() {
                return;
            }

            let candidate = {
                let mut attempt = self.attempt.lock().unwrap();
                if attempt.completer.is_none() {
                    return;
                }

                let Some(candidate) = self.candidates.get(attempt.next).copied() else {
                    drop(attempt);
                    debug!(candidates = self.candidates.len(), "every candidate failed");
                    self.complete(None);
                    return;
                };

                attempt.next += 1;
                attempt.attempts += 1;
                candidate
            };

            match self.begin(candidate) {
                Ok(Some(socket)) => {
                    trace!(%candidate, "connected immediately");
                    self.complete(Some(socket));
                    return;
                }
                Ok(None) => return,
                Err(err) => debug!(%candidate, error = %err, "candidate failed"),
            }
        }
    }

    /// Starts connecting to `candidate`. Returns the socket if it is
    /// already connected, `None` if a wait has been registered.
    fn begin(self: &Arc<Self>, candidate: SocketAddr) -> io::Result<Option<Socket>> {
        let family = Family::of(&candidate.ip());
        let socket = Socket::open(self.reactor.clone(), family)?;
        socket.bind(&SocketAddr::new(family.unspecified(), 0))?;

        trace!(%candidate, "connecting");

        let request = match self.reactor.model() {
            Model::Readiness => {
                if platform::sys_connect(socket.handle(), &candidate)? {
                    return Ok(Some(socket));
                }
                IoRequest::Poll
            }
            Model::Completion => IoRequest::Connect(candidate),
        };

        let handle = socket.handle();
        self.attempt.lock().unwrap().socket = Some(socket);

        let inner = self.clone();
        let token = self.reactor.wait_writable(
            handle,
            request,
            Box::new(move |notification| inner.submit(ConnectEvent::Notified(notification))),
        );

        *self.token.lock().unwrap() = Some(token);

        if self.state.start() {
            self.reactor.abort_waiter(token);
        }

        Ok(None)
    }

    fn on_notification(self: &Arc<Self>, notification: Notification) {
        let socket = self.attempt.lock().unwrap().socket.take();
        let Some(socket) = socket else {
            return;
        };

        let outcome = match notification {
            Notification::Ready => platform::sys_socket_error(socket.handle()),
            Notification::Connected => Ok(()),
            Notification::Failed(err) => Err(err),
            other => Err(io::Error::other(format!(
                "unexpected connect notification: {other:?}"
            ))),
        };

        match outcome {
            Ok(()) => {
                trace!(peer = ?socket.peer_addr().ok(), "connected");
                self.complete(Some(socket));
            }
            Err(err) => {
                debug!(error = %err, "candidate failed");
                drop(socket);
                self.try_next();
            }
        }
    }

    fn complete(&self, socket: Option<Socket>) {
        let completer = {
            let mut attempt = self.attempt.lock().unwrap();
            attempt.socket = None;
            attempt.completer.take()
        };

        if let Some(completer) = completer {
            completer.complete(socket.map(Connection::new));
        }
    }
}
