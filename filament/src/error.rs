//! Crate-wide error type.

use std::io;

use thiserror::Error;

/// Errors surfaced by the public API.
///
/// Transport failures during reads and writes are not errors: they are
/// reported as closed outcomes. This type covers setup failures
/// (binding, resolving), timeouts and protocol violations.
#[derive(Debug, Error)]
pub enum Error {
    /// An OS-level call failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The connection or listener has already been closed.
    #[error("connection closed")]
    Closed,

    /// A host name could not be resolved to any address.
    #[error("could not resolve `{0}`")]
    Resolve(String),

    /// A deadline elapsed before the operation completed.
    #[error(transparent)]
    Elapsed(#[from] crate::time::Elapsed),

    /// The peer violated the protocol in a way that could not be answered.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
