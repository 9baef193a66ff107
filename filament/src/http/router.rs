use super::{HttpError, Method, Request, Response};

use std::future::Future;
use std::pin::Pin;

/// Answers requests for one method.
///
/// A handler reads what it needs from the request and replies through
/// the response. Returning without replying sends `204 No Content`;
/// returning an error before replying sends the error's status, or
/// `500` for handler failures.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response,
    ) -> impl Future<Output = Result<(), HttpError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe form of [`Handler`] for the verb table.
trait ErasedHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        request: &'a mut Request<'_>,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), HttpError>>;
}

impl<H: Handler> ErasedHandler for H {
    fn call<'a>(
        &'a self,
        request: &'a mut Request<'_>,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        Box::pin(self.handle(request, response))
    }
}

/// Maps request methods to handlers.
///
/// `HEAD` falls back to the `GET` handler with the body suppressed.
///
/// # Examples
///
/// ```rust,ignore
/// let router = Router::new().get(Index).post(Upload);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<(Method, Box<dyn ErasedHandler>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`, replacing any previous one.
    pub fn route(mut self, method: Method, handler: impl Handler) -> Self {
        self.routes.retain(|(known, _)| *known != method);
        self.routes.push((method, Box::new(handler)));
        self
    }

    pub fn get(self, handler: impl Handler) -> Self {
        self.route(Method::Get, handler)
    }

    pub fn post(self, handler: impl Handler) -> Self {
        self.route(Method::Post, handler)
    }

    pub fn put(self, handler: impl Handler) -> Self {
        self.route(Method::Put, handler)
    }

    pub fn delete(self, handler: impl Handler) -> Self {
        self.route(Method::Delete, handler)
    }

    pub fn is_registered(&self, method: &Method) -> bool {
        self.routes.iter().any(|(known, _)| known == method)
    }

    /// Value of the `Allow` header: every servable method.
    pub fn allow(&self) -> String {
        let mut methods: Vec<&str> = self.routes.iter().map(|(m, _)| m.as_str()).collect();

        if self.is_registered(&Method::Get) && !self.is_registered(&Method::Head) {
            methods.push(Method::Head.as_str());
        }
        if !self.is_registered(&Method::Options) {
            methods.push(Method::Options.as_str());
        }

        methods.join(", ")
    }

    fn find(&self, method: &Method) -> Option<&dyn ErasedHandler> {
        let lookup = |wanted: &Method| {
            self.routes
                .iter()
                .find(|(known, _)| known == wanted)
                .map(|(_, handler)| handler.as_ref())
        };

        match method {
            Method::Head => lookup(&Method::Head).or_else(|| lookup(&Method::Get)),
            other => lookup(other),
        }
    }

    /// Runs the handler for the request's method. `None` when no handler
    /// serves it.
    pub(crate) async fn dispatch(
        &self,
        request: &mut Request<'_>,
        response: &mut Response,
    ) -> Option<Result<(), HttpError>> {
        let handler = self.find(request.method())?;
        Some(handler.call(request, response).await)
    }
}
