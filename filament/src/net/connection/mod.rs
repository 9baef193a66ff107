//! Duplex byte stream over one socket.
//!
//! A [`Connection`] runs at most one read and one write at a time. Each
//! request is its own small state machine ([`reader`], [`writer`]) whose
//! reactor notifications and aborts are serialised through a
//! [`Funnel`](crate::utils::Funnel), with an
//! [`AbortState`](crate::utils::AbortState) settling the race between
//! an abort and the OS step it has to cancel.

mod reader;
mod writer;

use crate::net::socket::Socket;
use crate::utils::{Completion, completion};
use reader::Reader;
use writer::Writer;

use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tracing::{trace, warn};

/// How long a read waits for data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// Return immediately with whatever is available, possibly nothing.
    Now,

    /// Wait until at least one byte has arrived.
    Some,

    /// Wait until the requested length is satisfied or the source closes.
    All,
}

/// Result of a read.
#[derive(Debug)]
pub struct ReadOutcome {
    /// The caller's buffer with the received bytes appended.
    pub buffer: BytesMut,

    /// Number of bytes appended by this read.
    pub transferred: usize,

    /// The source is closed: end of stream, a fatal error or an abort.
    pub closed: bool,
}

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub transferred: usize,

    /// The sink is closed: a fatal error or an abort.
    pub closed: bool,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Source,
    Sink,
}

pub(crate) struct Shared {
    socket: Mutex<Option<Arc<Socket>>>,
    reader: Mutex<Option<Arc<Reader>>>,
    writer: Mutex<Option<Arc<Writer>>>,
    source_closed: AtomicBool,
    sink_closed: AtomicBool,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl Shared {
    fn flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Source => &self.source_closed,
            Direction::Sink => &self.sink_closed,
        }
    }

    /// Marks one direction closed. The socket is released once both are.
    fn close(&self, direction: Direction) {
        if self.flag(direction).swap(true, Ordering::AcqRel) {
            return;
        }

        let socket = self.socket.lock().unwrap().clone();
        if let Some(socket) = &socket {
            let how = match direction {
                Direction::Source => Shutdown::Read,
                Direction::Sink => Shutdown::Write,
            };
            socket.shutdown(how);
        }

        trace!(?direction, peer = ?self.peer_addr, "direction closed");

        if self.source_closed.load(Ordering::Acquire) && self.sink_closed.load(Ordering::Acquire) {
            // In-flight requests keep their own reference until they finish.
            self.socket.lock().unwrap().take();
        }
    }

    fn reader_finished(&self, reader: &Arc<Reader>, closed: bool) {
        {
            let mut slot = self.reader.lock().unwrap();
            if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, reader)) {
                *slot = None;
            }
        }

        if closed {
            self.close(Direction::Source);
        }
    }

    fn writer_finished(&self, writer: &Arc<Writer>, closed: bool) {
        {
            let mut slot = self.writer.lock().unwrap();
            if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, writer)) {
                *slot = None;
            }
        }

        if closed {
            self.close(Direction::Sink);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().unwrap().take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.get_mut().unwrap().take() {
            writer.abort();
        }
    }
}

/// A duplex byte stream.
///
/// Cloning yields another handle to the same stream. The socket is
/// closed once both directions have been aborted or closed, or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new(socket: Socket) -> Self {
        let local_addr = socket.local_addr().ok();
        let peer_addr = socket.peer_addr().ok();

        Self {
            shared: Arc::new(Shared {
                socket: Mutex::new(Some(Arc::new(socket))),
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                source_closed: AtomicBool::new(false),
                sink_closed: AtomicBool::new(false),
                local_addr,
                peer_addr,
            }),
        }
    }

    /// Reads up to `len` bytes, appending them to `buffer`.
    ///
    /// Dropping the returned future does not cancel the read; use
    /// [`abort_source`](Self::abort_source). Starting a read while
    /// another is active is a usage error and completes immediately as
    /// closed.
    pub fn read(&self, buffer: BytesMut, len: usize, mode: ReadMode) -> Read {
        let (completer, completion) = completion();

        let closed = ReadOutcome {
            buffer: BytesMut::new(),
            transferred: 0,
            closed: true,
        };

        let socket = self.shared.socket.lock().unwrap().clone();
        let Some(socket) = socket.filter(|_| !self.is_source_closed()) else {
            completer.complete(ReadOutcome { buffer, ..closed });
            return Read { completion };
        };

        let reader = {
            let mut slot = self.shared.reader.lock().unwrap();
            if slot.is_some() {
                warn!(peer = ?self.shared.peer_addr, "read started while another is active");
                drop(slot);
                completer.complete(ReadOutcome { buffer, ..closed });
                return Read { completion };
            }

            let reader = Arc::new(Reader::new(
                Arc::downgrade(&self.shared),
                socket,
                buffer,
                len,
                mode,
                completer,
            ));
            *slot = Some(reader.clone());
            reader
        };

        reader.start();

        // Closed concurrently, after the active slot was checked.
        if self.is_source_closed() {
            reader.abort();
        }

        Read { completion }
    }

    /// Writes all of `buffer`.
    ///
    /// Completes once every byte has been accepted by the OS, or with
    /// `closed` set on a fatal error or abort. Starting a write while
    /// another is active completes immediately as closed.
    pub fn write(&self, buffer: Bytes) -> Write {
        let (completer, completion) = completion();

        let closed = WriteOutcome {
            transferred: 0,
            closed: true,
        };

        let socket = self.shared.socket.lock().unwrap().clone();
        let Some(socket) = socket.filter(|_| !self.is_sink_closed()) else {
            completer.complete(closed);
            return Write { completion };
        };

        let writer = {
            let mut slot = self.shared.writer.lock().unwrap();
            if slot.is_some() {
                warn!(peer = ?self.shared.peer_addr, "write started while another is active");
                drop(slot);
                completer.complete(closed);
                return Write { completion };
            }

            let writer = Arc::new(Writer::new(
                Arc::downgrade(&self.shared),
                socket,
                buffer,
                completer,
            ));
            *slot = Some(writer.clone());
            writer
        };

        writer.start();

        if self.is_sink_closed() {
            writer.abort();
        }

        Write { completion }
    }

    /// Aborts both directions and closes the socket. Idempotent.
    pub fn abort(&self) {
        self.abort_source();
        self.abort_sink();
    }

    /// Aborts the active read, if any, and closes the receiving side.
    pub fn abort_source(&self) {
        let reader = self.shared.reader.lock().unwrap().take();
        if let Some(reader) = reader {
            reader.abort();
        }

        self.shared.close(Direction::Source);
    }

    /// Aborts the active write, if any, and closes the sending side. The
    /// peer observes end of stream.
    pub fn abort_sink(&self) {
        let writer = self.shared.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            writer.abort();
        }

        self.shared.close(Direction::Sink);
    }

    pub fn is_source_closed(&self) -> bool {
        self.shared.source_closed.load(Ordering::Acquire)
    }

    pub fn is_sink_closed(&self) -> bool {
        self.shared.sink_closed.load(Ordering::Acquire)
    }

    /// Both directions are closed.
    pub fn is_closed(&self) -> bool {
        self.is_source_closed() && self.is_sink_closed()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// Whether both handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Future returned by [`Connection::read`].
pub struct Read {
    completion: Completion<ReadOutcome>,
}

impl Future for Read {
    type Output = ReadOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ReadOutcome> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

/// Future returned by [`Connection::write`].
pub struct Write {
    completion: Completion<WriteOutcome>,
}

impl Future for Write {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WriteOutcome> {
        Pin::new(&mut self.completion).poll(cx)
    }
}
