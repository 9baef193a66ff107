use super::Status;

use thiserror::Error;

/// Failures of one HTTP exchange.
///
/// Each parse failure knows the status it is answered with; failures
/// without one are fatal to the connection and get no reply.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("unsupported protocol version `{0}`")]
    Version(String),

    #[error("more than {0} header fields")]
    TooManyHeaders(usize),

    #[error("header line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("unsupported transfer coding `{0}`")]
    UnsupportedCoding(String),

    #[error("malformed chunk framing: {0}")]
    BadChunk(&'static str),

    #[error("request body larger than {0} bytes")]
    BodyTooLarge(u64),

    /// The response was used out of order, e.g. written before it was
    /// started or past its declared length.
    #[error("response misuse: {0}")]
    Misuse(&'static str),

    /// A handler failed for its own reasons.
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("connection closed")]
    Closed,
}

impl HttpError {
    /// The status this failure is answered with, or `None` when the
    /// connection must be dropped without a reply.
    pub fn status(&self) -> Option<Status> {
        match self {
            HttpError::Malformed(_) => Some(Status::BAD_REQUEST),
            HttpError::Version(_) => Some(Status::VERSION_NOT_SUPPORTED),
            HttpError::TooManyHeaders(_) => Some(Status::BAD_REQUEST),
            HttpError::LineTooLong(_) => Some(Status::BAD_REQUEST),
            HttpError::UnsupportedCoding(_) => Some(Status::NOT_IMPLEMENTED),
            HttpError::BodyTooLarge(_) => Some(Status::PAYLOAD_TOO_LARGE),
            HttpError::Misuse(_) | HttpError::Handler(_) => Some(Status::INTERNAL_SERVER_ERROR),
            HttpError::BadChunk(_) | HttpError::Closed => None,
        }
    }
}
