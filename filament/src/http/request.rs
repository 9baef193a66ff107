use super::chunked::ChunkDecoder;
use super::parser::{Framing, RequestHead};
use super::{Headers, HttpConfig, HttpError, Method, Version};
use crate::server::{ExchangeState, Transaction};

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::trace;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Largest piece handed out by one internal body read.
const BODY_CHUNK: usize = 16 * 1024;

enum Body {
    Fixed { remaining: u64 },
    Chunked(ChunkDecoder),
}

/// An incoming request.
///
/// The head is parsed before the handler runs; the body is read on
/// demand through [`read_body`](Self::read_body), decoded according to
/// its framing. A client that sent `Expect: 100-continue` gets the
/// interim `100 Continue` on the first body read, unless the final
/// response has already begun.
pub struct Request<'s> {
    transaction: Transaction<'s>,
    exchange: Arc<ExchangeState>,
    head: RequestHead,
    body: Body,
    expects_continue: bool,
    continue_sent: bool,
}

impl<'s> Request<'s> {
    pub(crate) fn new(
        transaction: Transaction<'s>,
        exchange: Arc<ExchangeState>,
        head: RequestHead,
        framing: Framing,
        config: &HttpConfig,
    ) -> Self {
        let body = match framing {
            Framing::Empty => Body::Fixed { remaining: 0 },
            Framing::Length(n) => Body::Fixed { remaining: n },
            Framing::Chunked => Body::Chunked(ChunkDecoder::new(
                config.max_trailers,
                config.max_header_line,
            )),
        };

        let expects_continue = head.version == Version::Http11
            && head.headers.has_token("expect", "100-continue");

        Self {
            transaction,
            exchange,
            head,
            body,
            expects_continue,
            continue_sent: false,
        }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// The request target exactly as sent.
    pub fn target(&self) -> &str {
        &self.head.target
    }

    /// The target without its query.
    pub fn path(&self) -> &str {
        match self.head.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.head.target,
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.head.target.split_once('?').map(|(_, query)| query)
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.exchange.connection().peer_addr()
    }

    /// Declared body length; `None` for chunked bodies.
    pub fn content_length(&self) -> Option<u64> {
        match self.body {
            Body::Fixed { remaining } => Some(remaining),
            Body::Chunked(_) => None,
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.body, Body::Chunked(_))
    }

    /// Every body byte has been read.
    pub fn is_body_complete(&self) -> bool {
        match &self.body {
            Body::Fixed { remaining } => *remaining == 0,
            Body::Chunked(decoder) => decoder.is_done(),
        }
    }

    /// Trailer fields of a chunked body, once it has been read to the
    /// end.
    pub fn trailers(&self) -> Option<&Headers> {
        match &self.body {
            Body::Chunked(decoder) => decoder.trailers(),
            Body::Fixed { .. } => None,
        }
    }

    /// Reads the next piece of the body, at most `max` bytes. An empty
    /// result means the body is complete.
    ///
    /// Fails with [`HttpError::Closed`] if the connection ends before the
    /// body does and with [`HttpError::BadChunk`] on broken framing.
    pub async fn read_body(&mut self, max: usize) -> Result<Bytes, HttpError> {
        if self.is_body_complete() || max == 0 {
            return Ok(Bytes::new());
        }

        self.send_continue().await?;

        match &mut self.body {
            Body::Fixed { remaining } => read_fixed(&mut self.transaction, remaining, max).await,
            Body::Chunked(decoder) => read_chunked(&mut self.transaction, decoder, max).await,
        }
    }

    /// Reads the whole body, failing with [`HttpError::BodyTooLarge`] past
    /// `limit` bytes.
    pub async fn read_to_end(&mut self, limit: u64) -> Result<Bytes, HttpError> {
        if let Body::Fixed { remaining } = self.body {
            if remaining > limit {
                return Err(HttpError::BodyTooLarge(limit));
            }
        }

        let mut body = BytesMut::new();
        loop {
            let chunk = self.read_body(BODY_CHUNK).await?;
            if chunk.is_empty() {
                return Ok(body.freeze());
            }
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(HttpError::BodyTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
    }

    /// The client is holding its body back until it sees `100 Continue`.
    pub(crate) fn awaits_continue(&self) -> bool {
        self.expects_continue && !self.continue_sent && !self.is_body_complete()
    }

    /// Reads and drops the rest of the body.
    pub(crate) async fn discard_body(&mut self, limit: u64) -> Result<(), HttpError> {
        let mut discarded = 0u64;

        while !self.is_body_complete() {
            let chunk = self.read_body(BODY_CHUNK).await?;
            discarded += chunk.len() as u64;
            if discarded > limit {
                return Err(HttpError::BodyTooLarge(limit));
            }
        }

        Ok(())
    }

    pub(crate) fn into_transaction(self) -> Transaction<'s> {
        self.transaction
    }

    async fn send_continue(&mut self) -> Result<(), HttpError> {
        if !self.expects_continue || self.continue_sent || self.exchange.is_responding() {
            return Ok(());
        }

        self.continue_sent = true;
        trace!(id = self.exchange.connection().id(), "100 continue");

        if !self.transaction.write(Bytes::from_static(CONTINUE)).await {
            return Err(HttpError::Closed);
        }
        Ok(())
    }
}

async fn read_fixed(
    transaction: &mut Transaction<'_>,
    remaining: &mut u64,
    max: usize,
) -> Result<Bytes, HttpError> {
    if transaction.buffered().is_empty() && !transaction.fill().await {
        return Err(HttpError::Closed);
    }

    let n = transaction
        .buffered()
        .len()
        .min(max)
        .min(usize::try_from(*remaining).unwrap_or(usize::MAX));
    let chunk = Bytes::copy_from_slice(&transaction.buffered()[..n]);
    transaction.consume(n);
    *remaining -= n as u64;

    Ok(chunk)
}

async fn read_chunked(
    transaction: &mut Transaction<'_>,
    decoder: &mut ChunkDecoder,
    max: usize,
) -> Result<Bytes, HttpError> {
    let mut out = BytesMut::new();

    loop {
        let consumed = decoder.decode(transaction.buffered(), &mut out, max)?;
        transaction.consume(consumed);

        if !out.is_empty() || decoder.is_done() {
            return Ok(out.freeze());
        }
        if !transaction.fill().await {
            return Err(HttpError::Closed);
        }
    }
}
