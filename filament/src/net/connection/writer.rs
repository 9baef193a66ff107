use super::{Shared, WriteOutcome};
use crate::net::socket::Socket;
use crate::reactor::poller::platform;
use crate::reactor::{IoRequest, Model, Notification, WaitToken};
use crate::utils::{AbortState, Completer, Funnel};

use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

/// Consecutive zero-byte sends after a writability notification that
/// close the sink.
const ZERO_SEND_LIMIT: u8 = 2;

pub(crate) enum WriteEvent {
    Start,
    Notified(Notification),
    Abort,
}

struct Progress {
    payload: Bytes,
    sent: usize,

    /// Set when the current attempt follows a writability notification.
    notified: bool,
    zero_sends: u8,
    completer: Option<Completer<WriteOutcome>>,
}

/// One in-flight write request. Mirrors [`Reader`](super::reader::Reader).
pub(crate) struct Writer {
    connection: Weak<Shared>,
    socket: Mutex<Option<Arc<Socket>>>,
    state: AbortState,
    token: Mutex<Option<WaitToken>>,
    funnel: Funnel<WriteEvent>,
    progress: Mutex<Progress>,
}

impl Writer {
    pub(crate) fn new(
        connection: Weak<Shared>,
        socket: Arc<Socket>,
        payload: Bytes,
        completer: Completer<WriteOutcome>,
    ) -> Self {
        Self {
            connection,
            socket: Mutex::new(Some(socket)),
            state: AbortState::new(),
            token: Mutex::new(None),
            funnel: Funnel::new(),
            progress: Mutex::new(Progress {
                payload,
                sent: 0,
                notified: false,
                zero_sends: 0,
                completer: Some(completer),
            }),
        }
    }

    pub(crate) fn start(self: &Arc<Self>) {
        self.submit(WriteEvent::Start);
    }

    pub(crate) fn abort(self: &Arc<Self>) {
        if self.state.request_abort() {
            self.cancel_wait();
        }

        self.submit(WriteEvent::Abort);
    }

    fn submit(self: &Arc<Self>, event: WriteEvent) {
        self.funnel.submit(event, |event| self.handle(event));
    }

    fn handle(self: &Arc<Self>, event: WriteEvent) {
        match event {
            WriteEvent::Start => self.attempt(),
            WriteEvent::Notified(notification) => {
                self.state.settle();
                self.token.lock().unwrap().take();
                self.on_notification(notification);
            }
            WriteEvent::Abort => {
                trace!("write aborted");
                self.finish(true);
            }
        }
    }

    fn socket(&self) -> Option<Arc<Socket>> {
        self.socket.lock().unwrap().clone()
    }

    fn attempt(self: &Arc<Self>) {
        if self.state.is_aborted() {
            return;
        }

        let Some(socket) = self.socket() else {
            return;
        };

        match socket.reactor().model() {
            Model::Readiness => self.send_now(&socket),
            Model::Completion => self.issue(&socket),
        }
    }

    /// Sends as much as the OS accepts, then waits for writability.
    fn send_now(self: &Arc<Self>, socket: &Arc<Socket>) {
        loop {
            let mut progress = self.progress.lock().unwrap();

            if progress.sent == progress.payload.len() {
                drop(progress);
                self.finish(false);
                return;
            }

            let sent = progress.sent;
            let result = platform::sys_send(socket.handle(), &progress.payload[sent..]);

            match result {
                Ok(0) => {
                    if progress.notified {
                        progress.zero_sends += 1;
                    }

                    if progress.zero_sends >= ZERO_SEND_LIMIT {
                        drop(progress);
                        debug!(handle = ?socket.handle(), "peer accepts no bytes");
                        self.finish(true);
                        return;
                    }

                    progress.notified = false;
                    drop(progress);
                    self.wait(socket, IoRequest::Poll);
                    return;
                }
                Ok(n) => {
                    progress.sent += n;
                    progress.zero_sends = 0;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    progress.notified = false;
                    drop(progress);
                    self.wait(socket, IoRequest::Poll);
                    return;
                }
                Err(err) => {
                    drop(progress);
                    debug!(handle = ?socket.handle(), error = %err, "send failed");
                    self.finish(true);
                    return;
                }
            }
        }
    }

    /// Hands the rest of the payload to the completion backend.
    fn issue(self: &Arc<Self>, socket: &Arc<Socket>) {
        let rest = {
            let progress = self.progress.lock().unwrap();
            progress.payload.slice(progress.sent..)
        };

        if rest.is_empty() {
            self.finish(false);
            return;
        }

        self.wait(socket, IoRequest::Send(rest));
    }

    fn wait(self: &Arc<Self>, socket: &Arc<Socket>, request: IoRequest) {
        let writer = self.clone();
        let token = socket.reactor().wait_writable(
            socket.handle(),
            request,
            Box::new(move |notification| writer.submit(WriteEvent::Notified(notification))),
        );

        *self.token.lock().unwrap() = Some(token);
        trace!(handle = ?socket.handle(), ?token, "write waiting");

        if self.state.start() {
            self.cancel_wait();
        }
    }

    fn cancel_wait(&self) {
        let token = *self.token.lock().unwrap();

        if let (Some(token), Some(socket)) = (token, self.socket()) {
            socket.reactor().abort_waiter(token);
        }
    }

    fn on_notification(self: &Arc<Self>, notification: Notification) {
        match notification {
            Notification::Ready => {
                self.progress.lock().unwrap().notified = true;
                self.attempt();
            }
            Notification::Sent(n) => {
                let fatal = {
                    let mut progress = self.progress.lock().unwrap();

                    if n == 0 {
                        progress.zero_sends += 1;
                    } else {
                        progress.sent += n;
                        progress.zero_sends = 0;
                    }

                    progress.zero_sends >= ZERO_SEND_LIMIT
                };

                if fatal {
                    debug!("peer accepts no bytes");
                    self.finish(true);
                } else {
                    self.attempt();
                }
            }
            Notification::Failed(err) => {
                debug!(error = %err, "write failed");
                self.finish(true);
            }
            other => {
                debug!(notification = ?other, "unexpected write notification");
                self.finish(true);
            }
        }
    }

    fn finish(self: &Arc<Self>, closed: bool) {
        let (completer, outcome) = {
            let mut progress = self.progress.lock().unwrap();

            let Some(completer) = progress.completer.take() else {
                return;
            };

            let outcome = WriteOutcome {
                transferred: progress.sent,
                closed,
            };

            (completer, outcome)
        };

        self.socket.lock().unwrap().take();

        if let Some(connection) = self.connection.upgrade() {
            connection.writer_finished(self, closed);
        }

        completer.complete(outcome);
    }
}
