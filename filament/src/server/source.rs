use super::ServerConnection;
use crate::error::{Error, Result};
use crate::net::ReadMode;

use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;

/// Bytes requested from the connection per receive.
const READ_CHUNK: usize = 16 * 1024;

/// A server connection plus its read-ahead buffer.
///
/// Bytes are received in chunks, so the buffer may hold the start of a
/// later exchange (pipelining). Each exchange reads through a
/// [`Transaction`] and consumes only its own bytes.
pub struct Source {
    connection: Arc<ServerConnection>,
    buffer: BytesMut,
    closed: bool,
}

impl Source {
    pub(crate) fn new(connection: Arc<ServerConnection>) -> Self {
        Self {
            connection,
            buffer: BytesMut::new(),
            closed: false,
        }
    }

    pub fn connection(&self) -> &Arc<ServerConnection> {
        &self.connection
    }

    /// Bytes received but not yet consumed by any exchange.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// The receiving side has closed; nothing more will be buffered.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Opens the view for the next exchange.
    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction {
            source: self,
            cursor: 0,
        }
    }

    /// Receives at least one more byte. Returns `false` once the source
    /// is closed.
    async fn fill(&mut self) -> bool {
        if self.closed || self.connection.is_aborted() {
            self.closed = true;
            return false;
        }

        let buffer = std::mem::take(&mut self.buffer);
        let outcome = self
            .connection
            .connection()
            .read(buffer, READ_CHUNK, ReadMode::Some)
            .await;

        self.buffer = outcome.buffer;
        if outcome.transferred > 0 {
            self.connection.touch();
        }
        if outcome.closed {
            self.closed = true;
        }

        outcome.transferred > 0
    }

    /// Sends `data`, restarting the inactivity timer. Returns `false` if
    /// the sink is closed.
    pub async fn write(&self, data: Bytes) -> bool {
        write_to(&self.connection, data).await
    }
}

/// Sends `data` on a server connection, restarting its inactivity timer
/// before and after the transfer.
pub(crate) async fn write_to(connection: &ServerConnection, data: Bytes) -> bool {
    if data.is_empty() {
        return !connection.connection().is_sink_closed();
    }

    connection.touch();
    let outcome = connection.connection().write(data).await;
    connection.touch();

    !outcome.closed
}

/// Per-exchange view of a [`Source`].
///
/// Reads advance a cursor over the read-ahead buffer. [`commit`] drops
/// the consumed bytes, [`rewind`] returns to the last commit, and
/// bytes past the cursor, which belong to later exchanges, are never
/// touched. Dropping a transaction without committing rewinds it.
///
/// [`commit`]: Self::commit
/// [`rewind`]: Self::rewind
pub struct Transaction<'s> {
    source: &'s mut Source,
    cursor: usize,
}

impl Transaction<'_> {
    pub fn connection(&self) -> &Arc<ServerConnection> {
        &self.source.connection
    }

    /// Buffered bytes not yet consumed by this exchange.
    pub fn buffered(&self) -> &[u8] {
        &self.source.buffer[self.cursor..]
    }

    /// Marks `n` buffered bytes as consumed.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are buffered.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.buffered().len(), "consumed past the buffered bytes");
        self.cursor += n;
    }

    /// Receives more bytes. Returns `false` once the source is closed.
    pub async fn fill(&mut self) -> bool {
        self.source.fill().await
    }

    pub fn is_closed(&self) -> bool {
        self.source.closed
    }

    /// Returns up to `max` bytes, receiving if nothing is buffered. An
    /// empty result means the source is closed.
    pub async fn read_up_to(&mut self, max: usize) -> Bytes {
        if self.buffered().is_empty() && !self.fill().await {
            return Bytes::new();
        }

        let n = self.buffered().len().min(max);
        let chunk = Bytes::copy_from_slice(&self.buffered()[..n]);
        self.consume(n);
        chunk
    }

    /// Reads one line terminated by LF, returned without its CRLF or LF.
    ///
    /// Fails with [`Error::Protocol`] if no terminator appears within
    /// `max` bytes and with [`Error::Closed`] if the source closes first.
    pub async fn read_line(&mut self, max: usize) -> Result<Bytes> {
        let mut scanned = 0;

        loop {
            let buffered = self.buffered();
            if let Some(offset) = buffered[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + offset;
                if end > max {
                    return Err(Error::Protocol("line too long".into()));
                }

                let line = &buffered[..end];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let line = Bytes::copy_from_slice(line);
                self.consume(end + 1);
                return Ok(line);
            }

            scanned = buffered.len();
            if scanned > max {
                return Err(Error::Protocol("line too long".into()));
            }

            if !self.fill().await {
                return Err(Error::Closed);
            }
        }
    }

    /// Drops the consumed bytes from the source. Later exchanges start
    /// after them.
    pub fn commit(&mut self) {
        self.source.buffer.advance(self.cursor);
        self.cursor = 0;
    }

    /// Forgets everything consumed since the last commit.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Aborts the whole connection.
    pub fn abort(&mut self) {
        self.source.connection.abort();
    }

    /// Sends `data`. Returns `false` if the sink is closed.
    pub async fn write(&self, data: Bytes) -> bool {
        self.source.write(data).await
    }
}
