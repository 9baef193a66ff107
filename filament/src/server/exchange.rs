use super::ServerConnection;

use std::sync::{Arc, Mutex};

use tracing::trace;

/// Progress of one request/response exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    ReadingRequest,
    Dispatched,
    WritingResponse,
    /// The response completed; the request is complete as well.
    Complete,
    Aborted,
}

/// State shared by a request and the response answering it.
///
/// The response holds a reference to this state, never the other way
/// around. Completing the response completes the request; a response
/// dropped before completing aborts it, and with it the connection.
pub struct ExchangeState {
    connection: Arc<ServerConnection>,
    stage: Mutex<Stage>,
}

impl ExchangeState {
    pub fn new(connection: Arc<ServerConnection>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            stage: Mutex::new(Stage::ReadingRequest),
        })
    }

    pub fn connection(&self) -> &Arc<ServerConnection> {
        &self.connection
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap()
    }

    fn advance(&self, from: &[Stage], to: Stage) -> bool {
        let mut stage = self.stage.lock().unwrap();
        if !from.contains(&stage) {
            return false;
        }

        trace!(id = self.connection.id(), from = ?*stage, ?to, "exchange");
        *stage = to;
        true
    }

    /// The request has been read far enough to hand to a handler.
    pub fn dispatch(&self) {
        self.advance(&[Stage::ReadingRequest], Stage::Dispatched);
    }

    /// A reply has begun. Returns `false` if one had already begun or the
    /// exchange is over.
    pub fn begin_response(&self) -> bool {
        self.advance(
            &[Stage::ReadingRequest, Stage::Dispatched],
            Stage::WritingResponse,
        )
    }

    pub fn complete(&self) {
        self.advance(
            &[Stage::ReadingRequest, Stage::Dispatched, Stage::WritingResponse],
            Stage::Complete,
        );
    }

    pub fn is_complete(&self) -> bool {
        self.stage() == Stage::Complete
    }

    pub fn is_responding(&self) -> bool {
        matches!(self.stage(), Stage::WritingResponse | Stage::Complete)
    }

    /// Aborts the exchange and its connection. No-op once complete.
    pub fn abort(&self) {
        if self.advance(
            &[Stage::ReadingRequest, Stage::Dispatched, Stage::WritingResponse],
            Stage::Aborted,
        ) {
            self.connection.abort();
        }
    }
}
