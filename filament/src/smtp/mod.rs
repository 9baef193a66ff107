//! SMTP receiver engine.
//!
//! A line-oriented command loop: each CRLF-terminated line is split into
//! a keyword and its parameters, dispatched case-insensitively, and
//! answered with a numeric [`Reply`]. The mail transaction (reverse path
//! and recipients) lives in the connection's [`SmtpSession`] until
//! `DATA` completes it or `RSET`/`QUIT` clears it.
//!
//! Supported: `HELO`, `EHLO` (advertising `PIPELINING` and `SIZE`),
//! `MAIL`, `RCPT`, `DATA`, `RSET`, `NOOP` and `QUIT`.

mod command;
mod config;
mod protocol;
mod reply;
mod sink;

pub use command::{Command, CommandError};
pub use config::SmtpConfig;
pub use protocol::{SmtpProtocol, SmtpSession};
pub use reply::Reply;
pub use sink::{Envelope, MailSink};
