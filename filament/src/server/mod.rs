//! Generic request/response server.
//!
//! A [`Server`] owns the set of live [`ServerConnection`]s. Each accepted
//! connection is driven by one task that runs the [`Protocol`]'s
//! exchanges back to back while the protocol asks for reuse:
//!
//! ```text
//! reading-request -> dispatched -> writing-response -> { reused | closing }
//! ```
//!
//! The reuse decision belongs to the protocol and is only taken once the
//! current response has completed. A connection that will not be reused
//! has its sink closed after the last response flushes, drains any
//! leftover input briefly, and is then released.

mod config;
mod connection;
mod exchange;
mod source;

pub use config::ServerConfig;
pub use connection::ServerConnection;
pub use exchange::{ExchangeState, Stage};
pub use source::{Source, Transaction};

pub(crate) use source::write_to;

use crate::error::Result;
use crate::net::{self, Connection, Family, Listener, ReadMode};
use crate::runtime::Handle;
use crate::time::timeout_with;
use connection::ConnectionSet;

use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

/// Upper bound on bytes drained from a closing connection.
const LINGER_LIMIT: usize = 64 * 1024;

/// What happens to a connection after an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the connection for another exchange.
    Reuse,

    /// Close the sink after the response and release the connection.
    Close,

    /// Abort the connection at once.
    Abort,
}

/// A line-oriented request/response protocol.
///
/// One value serves every connection of a server; per-connection state
/// lives in the [`Session`](Self::Session).
pub trait Protocol: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Creates the state of a freshly accepted connection.
    fn session(&self, connection: &Arc<ServerConnection>) -> Self::Session;

    /// Runs before the first exchange, for protocols where the server
    /// speaks first.
    fn greet(
        &self,
        session: &mut Self::Session,
        source: &mut Source,
    ) -> impl Future<Output = Disposition> + Send {
        let _ = (session, source);
        async { Disposition::Reuse }
    }

    /// Reads one request from `source`, answers it, and decides whether
    /// the connection is reused.
    ///
    /// `exchange` pairs the request with its response. The server only
    /// honours [`Disposition::Reuse`] once `exchange` is complete; an
    /// exchange left unfinished closes the connection.
    fn exchange(
        &self,
        session: &mut Self::Session,
        source: &mut Source,
        exchange: &Arc<ExchangeState>,
    ) -> impl Future<Output = Disposition> + Send;
}

struct Inner<P> {
    handle: Handle,
    protocol: P,
    config: ServerConfig,
    connections: Arc<ConnectionSet>,
    next_id: AtomicU64,
}

/// Owns the live connections of one protocol instance.
///
/// Cloning yields another handle to the same server.
pub struct Server<P: Protocol> {
    inner: Arc<Inner<P>>,
}

impl<P: Protocol> Clone for Server<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Protocol> Server<P> {
    pub fn new(handle: &Handle, protocol: P, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle: handle.clone(),
                protocol,
                config,
                connections: Arc::new(Mutex::new(HashMap::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.inner.protocol
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Takes ownership of a new connection: wraps it in exactly one
    /// [`ServerConnection`], adds it to the live set, starts its
    /// inactivity timer and drives its exchanges on a worker.
    pub fn accept(&self, connection: Connection) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let server_connection = ServerConnection::new(
            &self.inner.handle,
            id,
            connection,
            self.inner.config.inactivity_timeout,
            Arc::downgrade(&self.inner.connections),
        );

        self.inner
            .connections
            .lock()
            .unwrap()
            .insert(id, server_connection.clone());
        server_connection.touch();

        trace!(id, peer = ?server_connection.peer_addr(), "connection accepted");

        let inner = self.inner.clone();
        drop(self.inner.handle.spawn(drive(inner, server_connection)));
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().unwrap().len()
    }

    /// Whether connection `id` is still live.
    pub fn contains(&self, id: u64) -> bool {
        self.inner.connections.lock().unwrap().contains_key(&id)
    }

    /// Aborts every live connection.
    pub fn shutdown(&self) {
        let live: Vec<_> = self
            .inner
            .connections
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        debug!(connections = live.len(), "server shutting down");

        for connection in live {
            connection.abort();
        }
    }
}

/// Listens on the wildcard address of `family` and feeds every accepted
/// connection into `server`.
pub fn server_listen<P: Protocol>(server: &Server<P>, port: u16, family: Family) -> Result<Listener> {
    server_listen_on(server, SocketAddr::new(family.unspecified(), port))
}

/// Like [`server_listen`], on a specific local address.
pub fn server_listen_on<P: Protocol>(server: &Server<P>, addr: SocketAddr) -> Result<Listener> {
    let target = server.clone();
    net::listen_on(
        &server.inner.handle,
        move |connection| target.accept(connection),
        addr,
    )
}

async fn drive<P: Protocol>(inner: Arc<Inner<P>>, connection: Arc<ServerConnection>) {
    let mut source = Source::new(connection.clone());
    let mut session = inner.protocol.session(&connection);

    let mut disposition = inner.protocol.greet(&mut session, &mut source).await;

    while disposition == Disposition::Reuse {
        if connection.is_aborted() || !connection.is_reusable() {
            disposition = Disposition::Close;
            break;
        }

        let exchange = ExchangeState::new(connection.clone());
        disposition = inner
            .protocol
            .exchange(&mut session, &mut source, &exchange)
            .await;

        if disposition == Disposition::Reuse && !exchange.is_complete() {
            warn!(id = connection.id(), stage = ?exchange.stage(), "exchange left unfinished");
            disposition = Disposition::Close;
        }
    }

    match disposition {
        Disposition::Abort => connection.abort(),
        _ => release(&inner, &connection).await,
    }

    trace!(id = connection.id(), "connection released");
}

/// Closes the sink, drains what the peer still sends for a short while,
/// then releases the connection.
async fn release<P: Protocol>(inner: &Inner<P>, connection: &Arc<ServerConnection>) {
    if connection.is_aborted() {
        return;
    }

    connection.mark_not_reusable();

    let stream = connection.connection();
    stream.abort_sink();

    let drain = async {
        let mut drained = 0;
        while drained < LINGER_LIMIT {
            let outcome = stream.read(BytesMut::new(), 4096, ReadMode::Some).await;
            drained += outcome.transferred;
            if outcome.closed {
                break;
            }
        }
    };

    if timeout_with(&inner.handle, inner.config.linger, drain).await.is_err() {
        trace!(id = connection.id(), "linger elapsed");
    }

    connection.abort();
}
