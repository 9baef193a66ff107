use super::chunked::{encode_chunk, encode_last};
use super::parser::RequestHead;
use super::{Headers, HttpConfig, HttpError, Method, Status, Version, date};
use crate::server::{ExchangeState, write_to};

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use tracing::trace;

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// How the body of a started response is delimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transfer {
    Idle,
    /// Body bytes are discarded: `HEAD`, or a status without a body.
    NoBody,
    Fixed { remaining: u64 },
    Chunked,
    /// HTTP/1.0 without a length: the body ends when the connection
    /// closes.
    UntilClose,
    Finished,
}

/// The reply to one [`Request`](super::Request).
///
/// Status and headers may be changed until [`start`](Self::start); the
/// head is then sent with the first body bytes. The length passed to
/// `start` picks the framing: `Content-Length` when known, chunked
/// otherwise, close-delimited for HTTP/1.0 clients.
///
/// Finishing the response completes the exchange. Dropping it before
/// then aborts the exchange and its connection.
pub struct Response {
    exchange: Arc<ExchangeState>,
    config: Arc<HttpConfig>,
    version: Version,
    head_only: bool,
    keep_alive: bool,
    status: Status,
    headers: Headers,
    transfer: Transfer,
    pending: BytesMut,
}

impl Response {
    pub(crate) fn for_request(
        exchange: Arc<ExchangeState>,
        config: Arc<HttpConfig>,
        head: &RequestHead,
    ) -> Self {
        let keep_alive = match head.version {
            Version::Http11 => !head.headers.has_token("connection", "close"),
            Version::Http10 => head.headers.has_token("connection", "keep-alive"),
        };

        Self::new(exchange, config, head.version, head.method == Method::Head, keep_alive)
    }

    /// A response sent before the request could be parsed.
    pub(crate) fn detached(exchange: Arc<ExchangeState>, config: Arc<HttpConfig>) -> Self {
        Self::new(exchange, config, Version::Http11, false, false)
    }

    fn new(
        exchange: Arc<ExchangeState>,
        config: Arc<HttpConfig>,
        version: Version,
        head_only: bool,
        keep_alive: bool,
    ) -> Self {
        Self {
            exchange,
            config,
            version,
            head_only,
            keep_alive,
            status: Status::OK,
            headers: Headers::new(),
            transfer: Transfer::Idle,
            pending: BytesMut::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Headers sent with the response. `Content-Length`,
    /// `Transfer-Encoding` and `Connection` are computed and replace
    /// whatever is set here.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Closes the connection after this response.
    pub fn set_close(&mut self) {
        self.keep_alive = false;
    }

    pub fn is_started(&self) -> bool {
        self.transfer != Transfer::Idle
    }

    pub fn is_complete(&self) -> bool {
        self.transfer == Transfer::Finished
    }

    /// Whether the connection stays open for another request. Final once
    /// the response has started.
    pub fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    /// Sends `body` with the current status and finishes.
    pub async fn simple_reply(&mut self, body: impl Into<Bytes>) -> Result<(), HttpError> {
        let status = self.status;
        self.reply(status, body).await
    }

    /// Sends `body` with `status` and finishes.
    pub async fn reply(&mut self, status: Status, body: impl Into<Bytes>) -> Result<(), HttpError> {
        let body = body.into();

        self.status = status;
        self.start(Some(body.len() as u64))?;
        self.write(&body).await?;
        self.finish().await
    }

    /// Fixes status and headers. `content_length` of `None` streams the
    /// body chunked, or close-delimited to an HTTP/1.0 client.
    pub fn start(&mut self, content_length: Option<u64>) -> Result<(), HttpError> {
        if self.is_started() {
            return Err(HttpError::Misuse("response already started"));
        }
        if !self.exchange.begin_response() {
            return Err(HttpError::Closed);
        }

        let transfer = if self.status.forbids_body() {
            Transfer::NoBody
        } else {
            match content_length {
                Some(n) => Transfer::Fixed { remaining: n },
                None if self.version == Version::Http11 => Transfer::Chunked,
                None => Transfer::UntilClose,
            }
        };

        let connection = self.exchange.connection().clone();
        if transfer == Transfer::UntilClose || !connection.is_reusable() {
            self.keep_alive = false;
        }
        if !self.keep_alive {
            connection.mark_not_reusable();
        }

        self.write_head(transfer);

        self.transfer = if self.head_only {
            Transfer::NoBody
        } else {
            transfer
        };

        trace!(
            id = connection.id(),
            status = self.status.code(),
            keep_alive = self.keep_alive,
            "response started"
        );
        Ok(())
    }

    fn write_head(&mut self, transfer: Transfer) {
        for computed in ["content-length", "transfer-encoding", "connection"] {
            self.headers.remove(computed);
        }

        let mut head = String::with_capacity(256);
        head.push_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.reason()
        ));

        let mut field = |name: &str, value: &str| {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        };

        if !self.headers.contains("server") {
            field("Server", &self.config.server_name);
        }
        if !self.headers.contains("date") {
            field("Date", &date::now());
        }

        let has_body = !matches!(transfer, Transfer::NoBody | Transfer::Fixed { remaining: 0 });
        if has_body && !self.headers.contains("content-type") {
            field("Content-Type", DEFAULT_CONTENT_TYPE);
        }

        match transfer {
            Transfer::Fixed { remaining } => field("Content-Length", &remaining.to_string()),
            Transfer::Chunked => field("Transfer-Encoding", "chunked"),
            _ => {}
        }

        if !self.keep_alive {
            field("Connection", "close");
        } else if self.version == Version::Http10 {
            field("Connection", "keep-alive");
        }

        for (name, value) in self.headers.iter() {
            field(name, value);
        }
        head.push_str("\r\n");

        self.pending.extend_from_slice(head.as_bytes());
    }

    /// Sends body bytes, starting the response with unknown length if
    /// needed.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if !self.is_started() {
            self.start(None)?;
        }

        match &mut self.transfer {
            Transfer::Idle => return Err(HttpError::Misuse("response not started")),
            Transfer::Finished => return Err(HttpError::Misuse("response already finished")),
            Transfer::NoBody => {}
            Transfer::Fixed { remaining } => {
                if data.len() as u64 > *remaining {
                    return Err(HttpError::Misuse("body longer than its content length"));
                }
                *remaining -= data.len() as u64;
                self.pending.extend_from_slice(data);
            }
            Transfer::Chunked => encode_chunk(data, &mut self.pending),
            Transfer::UntilClose => self.pending.extend_from_slice(data),
        }

        self.flush().await
    }

    /// Ends the body and completes the exchange. Idempotent.
    pub async fn finish(&mut self) -> Result<(), HttpError> {
        match self.transfer {
            Transfer::Idle => self.start(Some(0))?,
            Transfer::Finished => return Ok(()),
            Transfer::Fixed { remaining } if remaining > 0 => {
                return Err(HttpError::Misuse("body shorter than its content length"));
            }
            Transfer::Chunked => encode_last(&mut self.pending),
            _ => {}
        }

        self.flush().await?;
        self.transfer = Transfer::Finished;
        self.exchange.complete();
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), HttpError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let data = self.pending.split().freeze();
        if !write_to(self.exchange.connection(), data).await {
            self.exchange.abort();
            return Err(HttpError::Closed);
        }
        Ok(())
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if !self.exchange.is_complete() {
            self.exchange.abort();
        }
    }
}
