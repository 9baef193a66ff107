//! # filament
//!
//! **filament** is an asynchronous network transport and request/response
//! serving core. It pairs a small work-stealing runtime with a socket
//! multiplexer and builds protocol servers on top:
//!
//! - a **reactor** with a readiness backend (epoll on Linux, kqueue on
//!   macOS and the BSDs) and a completion backend (I/O completion ports
//!   on Windows) behind one interface
//! - **duplex connections** whose reads and writes are explicit state
//!   machines with cooperative, race-free aborts
//! - **outbound connects** across an ordered candidate list and a
//!   persistent **accept loop**
//! - a generic **request/response server** with per-connection
//!   inactivity timers and keep-alive reuse
//! - an **HTTP/1.1** engine and an **SMTP** receiver
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use filament::http::{Handler, HttpError, HttpProtocol, Request, Response, Router};
//! use filament::net::Family;
//! use filament::server::{Server, ServerConfig, server_listen};
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle(&self, _: &mut Request<'_>, response: &mut Response) -> Result<(), HttpError> {
//!         response.simple_reply("<html>hello</html>").await
//!     }
//! }
//!
//! #[filament::main]
//! async fn main() {
//!     let handle = filament::Handle::current();
//!     let server = Server::new(&handle, HttpProtocol::new(Router::new().get(Hello)), ServerConfig::new());
//!     let listener = server_listen(&server, 8080, Family::V4).unwrap();
//!     listener.closed().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`net`]: addresses, connections, connecters and listeners
//! - [`server`]: connection lifecycle and the [`Protocol`](server::Protocol) seam
//! - [`http`]: HTTP/1.x parsing, framing and verb dispatch
//! - [`smtp`]: SMTP command loop and mail transactions
//! - [`time`]: sleep, timeout and restartable timers
//! - [`task`]: spawning futures
//!
//! Every constructor that needs the reactor takes an explicit
//! [`Handle`]. [`Handle::current`] falls back to a process-wide default
//! runtime when called outside a worker.

mod error;
mod reactor;
mod runtime;
mod utils;

pub mod http;
pub mod net;
pub mod server;
pub mod smtp;
pub mod time;

pub use error::{Error, Result};
pub use runtime::task;
pub use runtime::{Handle, Runtime, RuntimeBuilder, Scheduler};

pub use filament_macros::*;
