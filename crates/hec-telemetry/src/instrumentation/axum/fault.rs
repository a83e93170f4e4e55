use std::{
    any::Any,
    convert::Infallible,
    error::Error,
    panic::AssertUnwindSafe,
    task::{Context, Poll},
};

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{FutureExt as _, future::BoxFuture};
use tower::{Layer, Service, ServiceExt as _};

use super::{X_RESPONSE_EXCEPTION, X_RESPONSE_STACK_TRACE, header_str, header_value_lossy};

/// The body of every response produced for an unhandled failure.
pub const GENERIC_ERROR_BODY: &str = "An error occurred. Please try again later.";

/// Describes an unhandled failure of a request handler.
///
/// The [`FaultLayer`] attaches it as a response extension and mirrors it into
/// the `X-Response-Exception` and `X-Response-StackTrace` headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    /// The display message of the outermost error.
    pub message: String,

    /// The rendered cause chain, like `0: outer; 1: inner`.
    pub stack_trace: String,
}

impl Fault {
    /// Describes an error and its chain of [`Error::source`]s.
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut frames = Vec::new();
        let mut current = Some(error);

        while let Some(error) = current {
            frames.push(format!("{}: {error}", frames.len()));
            current = error.source();
        }

        Self {
            message: error.to_string(),
            stack_trace: frames.join("; "),
        }
    }

    /// Describes the payload of a caught panic.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "handler panicked".to_owned()
        };

        Self {
            stack_trace: format!("0: panicked: {message}"),
            message,
        }
    }

    /// Reads a fault from the signaling headers of a response.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let message = header_str(headers, &X_RESPONSE_EXCEPTION);

        (!message.is_empty()).then(|| Self {
            message,
            stack_trace: header_str(headers, &X_RESPONSE_STACK_TRACE),
        })
    }

    /// Emits the fault as ERROR record.
    pub fn emit(&self, description: &str) {
        tracing::error!(
            exception.message = %self.message,
            exception.stacktrace = %self.stack_trace,
            "{description}"
        );
    }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_BODY).into_response();

        let headers = response.headers_mut();
        headers.insert(X_RESPONSE_EXCEPTION, header_value_lossy(&self.message));
        headers.insert(X_RESPONSE_STACK_TRACE, header_value_lossy(&self.stack_trace));

        response.extensions_mut().insert(self);
        response
    }
}

/// A Tower [`Layer`] which decorates [`FaultService`].
///
/// Errors returned by and panics raised in the wrapped service are logged and
/// converted into a `500 Internal Server Error` response with the
/// [`GENERIC_ERROR_BODY`]. Failure details only leave the process through the
/// signaling headers, never through the body. The resulting service never
/// fails.
#[derive(Clone, Debug, Default)]
pub struct FaultLayer;

impl FaultLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for FaultLayer {
    type Service = FaultService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultService { inner }
    }
}

/// A Tower [`Service`] which converts failures of the inner service into
/// responses. See [`FaultLayer`].
#[derive(Clone, Debug)]
pub struct FaultService<S> {
    inner: S,
}

impl<S> Service<Request> for FaultService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Error: Error + Send + 'static,
    S::Future: Send + 'static,
{
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;
    type Response = Response;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner service is awaited inside the returned
        // future, where its errors can be turned into responses.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let result = AssertUnwindSafe(async move { inner.oneshot(req).await })
                .catch_unwind()
                .await;

            let fault = match result {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(error)) => Fault::from_error(&error),
                Err(payload) => Fault::from_panic(payload.as_ref()),
            };

            fault.emit("An unhandled exception occurred.");
            Ok(fault.into_response())
        })
    }
}
