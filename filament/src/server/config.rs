use std::time::Duration;

/// Settings shared by every connection of a [`Server`](super::Server).
///
/// # Examples
///
/// ```rust,ignore
/// let config = ServerConfig::new().inactivity_timeout(Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Idle time after which a connection is aborted. `None` disables the
    /// timer.
    pub inactivity_timeout: Option<Duration>,

    /// How long a connection closing after its last response keeps
    /// draining input, so unread request bytes do not turn the close
    /// into a reset.
    pub linger: Duration,
}

impl ServerConfig {
    /// Defaults: 60 s inactivity timeout, 2 s linger.
    pub fn new() -> Self {
        Self {
            inactivity_timeout: Some(Duration::from_secs(60)),
            linger: Duration::from_secs(2),
        }
    }

    pub fn inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
