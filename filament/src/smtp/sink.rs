use super::Reply;

use bytes::Bytes;
use std::future::Future;

/// A message accepted by `DATA`, with its envelope.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Domain given by the last `HELO`/`EHLO`, if any.
    pub helo: Option<String>,

    /// `MAIL FROM` path; empty for the null sender.
    pub reverse_path: String,

    pub recipients: Vec<String>,

    /// Message content with dot-stuffing removed, lines CRLF-terminated.
    pub data: Bytes,
}

/// Receives every message the server accepts.
///
/// Returning `Err` rejects the message with that reply; the client then
/// sees the reply instead of `250`.
pub trait MailSink: Send + Sync + 'static {
    fn deliver(&self, envelope: Envelope) -> impl Future<Output = Result<(), Reply>> + Send;
}
