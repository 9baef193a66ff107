use super::parser::{self, RequestHead, RequestParser};
use super::{HttpConfig, HttpError, Method, Request, Response, Router, Status};
use crate::server::{Disposition, ExchangeState, Protocol, ServerConnection, Source, Transaction};

use bytes::Bytes;
use std::sync::Arc;

use tracing::{debug, trace, warn};

/// HTTP/1.x on top of the generic [`Server`](crate::server::Server).
///
/// # Examples
///
/// ```rust,ignore
/// let protocol = HttpProtocol::new(Router::new().get(Index));
/// let server = Server::new(&handle, protocol, ServerConfig::new());
/// let listener = server_listen(&server, 8080, Family::V4)?;
/// ```
pub struct HttpProtocol {
    router: Router,
    config: Arc<HttpConfig>,
}

impl HttpProtocol {
    pub fn new(router: Router) -> Self {
        Self::with_config(router, HttpConfig::new())
    }

    pub fn with_config(router: Router, config: HttpConfig) -> Self {
        Self {
            router,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    async fn respond(&self, request: &mut Request<'_>, response: &mut Response) -> Result<(), HttpError> {
        let method = request.method().clone();

        let options = method == Method::Options
            && (request.target() == "*" || !self.router.is_registered(&Method::Options));
        if options {
            response.set_header("Allow", self.router.allow());
            return response.reply(Status::OK, Bytes::new()).await;
        }

        match self.router.dispatch(request, response).await {
            Some(result) => result,
            None => {
                let status = if method.is_standard() {
                    Status::METHOD_NOT_ALLOWED
                } else {
                    Status::NOT_IMPLEMENTED
                };
                debug!(%method, status = status.code(), "no handler");

                response.set_header("Allow", self.router.allow());
                error_reply(response, status).await
            }
        }
    }

    /// Answers a request that failed before dispatch and closes.
    async fn refuse(&self, exchange: &Arc<ExchangeState>, err: HttpError) -> Disposition {
        let Some(status) = err.status() else {
            debug!(id = exchange.connection().id(), error = %err, "dropping connection");
            return Disposition::Abort;
        };

        debug!(id = exchange.connection().id(), error = %err, "rejecting request");

        let mut response = Response::detached(exchange.clone(), self.config.clone());
        match error_reply(&mut response, status).await {
            Ok(()) => Disposition::Close,
            Err(_) => Disposition::Abort,
        }
    }
}

impl Protocol for HttpProtocol {
    type Session = ();

    fn session(&self, _connection: &Arc<ServerConnection>) -> Self::Session {}

    async fn exchange(
        &self,
        _session: &mut (),
        source: &mut Source,
        exchange: &Arc<ExchangeState>,
    ) -> Disposition {
        let connection = source.connection().clone();
        let mut transaction = source.transaction();

        let head = match read_head(&mut transaction, &self.config).await {
            Ok(Some(head)) => head,
            Ok(None) => return Disposition::Close,
            Err(err) => return self.refuse(exchange, err).await,
        };
        let framing = match parser::framing(&head.headers) {
            Ok(framing) => framing,
            Err(err) => return self.refuse(exchange, err).await,
        };

        trace!(id = connection.id(), method = %head.method, target = %head.target, "request");

        let mut response = Response::for_request(exchange.clone(), self.config.clone(), &head);
        let mut request = Request::new(transaction, exchange.clone(), head, framing, &self.config);
        exchange.dispatch();

        match self.respond(&mut request, &mut response).await {
            Ok(()) if !response.is_started() => {
                if response.reply(Status::NO_CONTENT, Bytes::new()).await.is_err() {
                    return Disposition::Abort;
                }
            }
            Ok(()) => {}
            Err(err) if response.is_started() => {
                warn!(id = connection.id(), error = %err, "handler failed mid-response");
                return Disposition::Abort;
            }
            Err(err) => {
                let Some(status) = err.status() else {
                    debug!(id = connection.id(), error = %err, "dropping connection");
                    return Disposition::Abort;
                };

                warn!(id = connection.id(), error = %err, "handler failed");
                response.set_close();
                if error_reply(&mut response, status).await.is_err() {
                    return Disposition::Abort;
                }
            }
        }

        if response.finish().await.is_err() {
            return Disposition::Abort;
        }

        if response.keeps_alive() && !request.is_body_complete() {
            if request.awaits_continue() {
                connection.mark_not_reusable();
            } else if let Err(err) = request.discard_body(self.config.max_drain).await {
                debug!(id = connection.id(), error = %err, "could not drain request body");
                connection.mark_not_reusable();
            }
        }

        request.into_transaction().commit();

        if response.keeps_alive() && connection.is_reusable() {
            Disposition::Reuse
        } else {
            Disposition::Close
        }
    }
}

/// Parses the next request head. `None` when the connection closes
/// before a request starts.
async fn read_head(
    transaction: &mut Transaction<'_>,
    config: &HttpConfig,
) -> Result<Option<RequestHead>, HttpError> {
    let mut parser = RequestParser::new(config.max_headers, config.max_header_line);

    loop {
        let (consumed, head) = parser.feed(transaction.buffered())?;
        transaction.consume(consumed);

        if let Some(head) = head {
            return Ok(Some(head));
        }
        if !transaction.fill().await {
            return if parser.is_idle() {
                Ok(None)
            } else {
                Err(HttpError::Closed)
            };
        }
    }
}

async fn error_reply(response: &mut Response, status: Status) -> Result<(), HttpError> {
    response.set_header("Content-Type", "text/plain; charset=utf-8");
    response.reply(status, status.reason()).await
}
