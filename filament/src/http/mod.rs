//! HTTP/1.1 server engine.
//!
//! Requests are parsed by a streaming state machine
//! (`request-line -> headers -> body`), bodies are framed by
//! `Content-Length` or chunked coding, and each request is dispatched by
//! method through a [`Router`] to a [`Handler`].
//!
//! Connections are reused when the client allows it and the response
//! length is known without closing: a `Content-Length`, or the final
//! empty chunk. HTTP/1.0 clients never receive chunked bodies.

mod chunked;
mod config;
mod date;
mod error;
mod headers;
mod method;
mod parser;
mod protocol;
mod request;
mod response;
mod router;
mod status;

pub use config::HttpConfig;
pub use error::HttpError;
pub use headers::Headers;
pub use method::{Method, Version};
pub use protocol::HttpProtocol;
pub use request::Request;
pub use response::Response;
pub use router::{Handler, Router};
pub use status::Status;
