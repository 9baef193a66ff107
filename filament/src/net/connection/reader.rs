use super::{ReadMode, ReadOutcome, Shared};
use crate::net::socket::Socket;
use crate::reactor::poller::platform;
use crate::reactor::{IoRequest, Model, Notification, RawHandle, WaitToken};
use crate::utils::{AbortState, Completer, Funnel};

use bytes::BytesMut;
use std::io;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

/// Events serialised through a reader's funnel.
pub(crate) enum ReadEvent {
    Start,
    Notified(Notification),
    Abort,
}

struct Progress {
    buffer: BytesMut,
    len: usize,
    transferred: usize,
    completer: Option<Completer<ReadOutcome>>,
}

/// One in-flight read request.
///
/// Lives from the start of a read until its completion. Holds the socket
/// strongly only while active and the connection only weakly, so a
/// pending read never keeps a dropped connection alive.
pub(crate) struct Reader {
    connection: Weak<Shared>,
    socket: Mutex<Option<Arc<Socket>>>,
    mode: ReadMode,
    state: AbortState,
    token: Mutex<Option<WaitToken>>,
    funnel: Funnel<ReadEvent>,
    progress: Mutex<Progress>,
}

impl Reader {
    pub(crate) fn new(
        connection: Weak<Shared>,
        socket: Arc<Socket>,
        buffer: BytesMut,
        len: usize,
        mode: ReadMode,
        completer: Completer<ReadOutcome>,
    ) -> Self {
        Self {
            connection,
            socket: Mutex::new(Some(socket)),
            mode,
            state: AbortState::new(),
            token: Mutex::new(None),
            funnel: Funnel::new(),
            progress: Mutex::new(Progress {
                buffer,
                len,
                transferred: 0,
                completer: Some(completer),
            }),
        }
    }

    pub(crate) fn start(self: &Arc<Self>) {
        self.submit(ReadEvent::Start);
    }

    /// Cancels the outstanding OS step, if any, and completes the request
    /// as closed. Safe to call from any context, any number of times.
    pub(crate) fn abort(self: &Arc<Self>) {
        if self.state.request_abort() {
            self.cancel_wait();
        }

        self.submit(ReadEvent::Abort);
    }

    fn submit(self: &Arc<Self>, event: ReadEvent) {
        self.funnel.submit(event, |event| self.handle(event));
    }

    fn handle(self: &Arc<Self>, event: ReadEvent) {
        match event {
            ReadEvent::Start => self.attempt(),
            ReadEvent::Notified(notification) => {
                self.state.settle();
                self.token.lock().unwrap().take();
                self.on_notification(notification);
            }
            ReadEvent::Abort => {
                trace!("read aborted");
                self.finish(true);
            }
        }
    }

    fn socket(&self) -> Option<Arc<Socket>> {
        self.socket.lock().unwrap().clone()
    }

    fn attempt(self: &Arc<Self>) {
        // The queued `Abort` event completes the request.
        if self.state.is_aborted() {
            return;
        }

        let Some(socket) = self.socket() else {
            return;
        };

        if self.mode == ReadMode::Now || socket.reactor().model() == Model::Readiness {
            self.receive_now(&socket);
        } else {
            self.issue(&socket);
        }
    }

    /// Receives directly until the request is satisfied or the socket has
    /// nothing more to give.
    fn receive_now(self: &Arc<Self>, socket: &Arc<Socket>) {
        loop {
            let mut progress = self.progress.lock().unwrap();

            let remaining = progress.len - progress.transferred;
            if remaining == 0 {
                drop(progress);
                self.finish(false);
                return;
            }

            let start = progress.buffer.len();
            progress.buffer.resize(start + remaining, 0);
            let result = receive(socket.handle(), &mut progress.buffer[start..]);
            let received = *result.as_ref().unwrap_or(&0);
            progress.buffer.truncate(start + received);

            match result {
                Ok(0) => {
                    drop(progress);
                    trace!(handle = ?socket.handle(), "end of stream");
                    self.finish(true);
                    return;
                }
                Ok(n) => {
                    progress.transferred += n;

                    if self.mode != ReadMode::All || progress.transferred == progress.len {
                        drop(progress);
                        self.finish(false);
                        return;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    drop(progress);

                    if self.mode == ReadMode::Now {
                        self.finish(false);
                    } else {
                        self.wait(socket, IoRequest::Poll);
                    }
                    return;
                }
                Err(err) => {
                    drop(progress);
                    debug!(handle = ?socket.handle(), error = %err, "receive failed");
                    self.finish(true);
                    return;
                }
            }
        }
    }

    /// Hands the receive to the completion backend.
    fn issue(self: &Arc<Self>, socket: &Arc<Socket>) {
        let remaining = {
            let progress = self.progress.lock().unwrap();
            progress.len - progress.transferred
        };

        if remaining == 0 {
            self.finish(false);
            return;
        }

        self.wait(socket, IoRequest::Recv { len: remaining });
    }

    fn wait(self: &Arc<Self>, socket: &Arc<Socket>, request: IoRequest) {
        let reader = self.clone();
        let token = socket.reactor().wait_readable(
            socket.handle(),
            request,
            Box::new(move |notification| reader.submit(ReadEvent::Notified(notification))),
        );

        *self.token.lock().unwrap() = Some(token);
        trace!(handle = ?socket.handle(), ?token, "read waiting");

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
            Notification::Ready => self.attempt(),
            Notification::Received(bytes) => {
                if bytes.is_empty() {
                    self.finish(true);
                    return;
                }

                let satisfied = {
                    let mut progress = self.progress.lock().unwrap();
                    progress.buffer.extend_from_slice(&bytes);
                    progress.transferred += bytes.len();

                    self.mode != ReadMode::All || progress.transferred >= progress.len
                };

                if satisfied {
                    self.finish(false);
                } else {
                    self.attempt();
                }
            }
            Notification::Failed(err) => {
                debug!(error = %err, "read failed");
                self.finish(true);
            }
            other => {
                debug!(notification = ?other, "unexpected read notification");
                self.finish(true);
            }
        }
    }

    /// Completes the request exactly once. Later calls are no-ops.
    fn finish(self: &Arc<Self>, closed: bool) {
        let (completer, outcome) = {
            let mut progress = self.progress.lock().unwrap();

            let Some(completer) = progress.completer.take() else {
                return;
            };

            let outcome = ReadOutcome {
                buffer: std::mem::take(&mut progress.buffer),
                transferred: progress.transferred,
                closed,
            };

            (completer, outcome)
        };

        self.socket.lock().unwrap().take();

        if let Some(connection) = self.connection.upgrade() {
            connection.reader_finished(self, closed);
        }

        completer.complete(outcome);
    }
}

#[cfg(unix)]
fn receive(handle: RawHandle, buffer: &mut [u8]) -> io::Result<usize> {
    platform::sys_recv(handle, buffer)
}

/// Synchronous receive bounded by what is already buffered, so it never
/// blocks and never leaves an operation in flight.
#[cfg(windows)]
fn receive(handle: RawHandle, buffer: &mut [u8]) -> io::Result<usize> {
    let available = platform::sys_available(handle)?.min(buffer.len());
    if available == 0 {
        return Err(io::ErrorKind::WouldBlock.into());
    }

    platform::sys_recv(handle, &mut buffer[..available])
}
