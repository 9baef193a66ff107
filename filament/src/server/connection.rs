use crate::net::Connection;
use crate::runtime::Handle;
use crate::time::Timer;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;

/// The live connections of one server, keyed by connection id.
pub(crate) type ConnectionSet = Mutex<HashMap<u64, Arc<ServerConnection>>>;

/// Server-side view of an accepted [`Connection`].
///
/// Owned by its server's connection set until aborted. Carries the reuse
/// flag and the inactivity timer; any protocol activity restarts the
/// timer and its expiry aborts the connection.
pub struct ServerConnection {
    id: u64,
    connection: Connection,
    reusable: AtomicBool,
    aborted: AtomicBool,
    timer: Option<Timer>,
    set: Weak<ConnectionSet>,
}

impl ServerConnection {
    pub(crate) fn new(
        handle: &Handle,
        id: u64,
        connection: Connection,
        inactivity_timeout: Option<Duration>,
        set: Weak<ConnectionSet>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ServerConnection>| {
            let timer = inactivity_timeout.map(|period| {
                let weak = weak.clone();
                Timer::new(handle, period, move || {
                    if let Some(connection) = weak.upgrade() {
                        debug!(id = connection.id, "inactivity timeout");
                        connection.abort();
                    }
                })
            });

            Self {
                id,
                connection,
                reusable: AtomicBool::new(true),
                aborted: AtomicBool::new(false),
                timer,
                set,
            }
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.peer_addr()
    }

    /// Restarts the inactivity timer.
    pub fn touch(&self) {
        if let Some(timer) = &self.timer {
            if !self.is_aborted() {
                timer.restart();
            }
        }
    }

    /// Marks the connection as not to be reused after the current
    /// exchange.
    pub fn mark_not_reusable(&self) {
        self.reusable.store(false, Ordering::Release);
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Removes the connection from its server and aborts the underlying
    /// stream. Idempotent.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(timer) = &self.timer {
            timer.cancel();
        }

        self.mark_not_reusable();
        self.connection.abort();

        if let Some(set) = self.set.upgrade() {
            let removed = set.lock().unwrap().remove(&self.id);
            drop(removed);
        }

        debug!(id = self.id, peer = ?self.peer_addr(), "connection aborted");
    }
}
