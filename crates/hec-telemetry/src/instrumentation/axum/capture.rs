use std::{
    error::Error,
    panic::AssertUnwindSafe,
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Request},
    http::{HeaderMap, HeaderName, StatusCode, header::CONTENT_LENGTH, request::Parts},
    response::{IntoResponse, Response},
};
use futures_util::{FutureExt as _, future::BoxFuture};
use opentelemetry::{Context as OtelContext, propagation::Extractor, trace::SpanKind};
use tower::{Layer, Service};
use tracing::{Instrument as _, Span, field::Empty};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

use super::{CorrelationId, Fault, X_RESPONSE_MESSAGE, X_RESPONSE_TIME, header_str};
use crate::ServiceCall;

/// The default maximum number of body bytes included in a service call
/// record.
pub const DEFAULT_MAX_LOGGED_BODY: usize = 64 * 1024;

/// A Tower [`Layer`] which decorates [`CaptureService`].
///
/// For every request, the service emits exactly one
/// [`ServiceCall`][crate::ServiceCall] record and one `service_call` span.
/// The record contains the correlation id, the request method, path, query
/// and body, and the response status code, body, time and failure details.
///
/// Request and response bodies are buffered in memory. The downstream
/// service and the client see the complete, unchanged bodies; only the
/// copies in the record are truncated to [`CaptureLayer::with_max_logged_body`]
/// bytes.
///
/// ```
/// use axum::{Router, routing::post};
/// use hec_telemetry::CaptureLayer;
///
/// let router = Router::new()
///     .route("/echo", post(|body: String| async move { body }))
///     .layer(CaptureLayer::new().with_max_logged_body(1024));
///
/// # let _: Router = router;
/// ```
#[derive(Clone, Debug)]
pub struct CaptureLayer {
    max_logged_body: usize,
}

impl Default for CaptureLayer {
    fn default() -> Self {
        Self {
            max_logged_body: DEFAULT_MAX_LOGGED_BODY,
        }
    }
}

impl CaptureLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of body bytes copied into the record.
    pub fn with_max_logged_body(mut self, max_logged_body: usize) -> Self {
        self.max_logged_body = max_logged_body;
        self
    }
}

impl<S> Layer<S> for CaptureLayer {
    type Service = CaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureService {
            inner,
            max_logged_body: self.max_logged_body,
        }
    }
}

/// A Tower [`Service`] which records request/response exchanges. See
/// [`CaptureLayer`].
#[derive(Clone, Debug)]
pub struct CaptureService<S> {
    inner: S,
    max_logged_body: usize,
}

impl<S> Service<Request> for CaptureService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Error: Error + Send + 'static,
    S::Future: Send + 'static,
{
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;
    type Response = Response;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // The clone might not be ready yet, so the ready service is moved
        // into the future and the clone stays behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(capture(inner, req, self.max_logged_body))
    }
}

async fn capture<S>(mut inner: S, req: Request, max_logged_body: usize) -> Result<Response, S::Error>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Error: Error + Send + 'static,
    S::Future: Send + 'static,
{
    let (mut parts, body) = req.into_parts();
    let correlation_id = CorrelationId::ensure(&mut parts);
    let span = service_call_span(&parts, &correlation_id);

    let mut call = ServiceCall {
        correlation_id: correlation_id.to_string(),
        request_method: parts.method.to_string(),
        request_uri: parts.uri.path().to_owned(),
        request_query: parts
            .uri
            .query()
            .map(|query| format!("?{query}"))
            .unwrap_or_default(),
        ..Default::default()
    };

    let request_body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(%error, %correlation_id, "failed to buffer request body");
            return Ok(StatusCode::BAD_REQUEST.into_response());
        }
    };
    call.request_content = lossy_truncated(&request_body, max_logged_body);

    let req = Request::from_parts(parts, Body::from(request_body));

    let started_at = Instant::now();
    let result = AssertUnwindSafe(async move { inner.call(req).await })
        .catch_unwind()
        .instrument(span.clone())
        .await;
    let elapsed_ms = started_at.elapsed().as_millis();

    match result {
        Ok(Ok(response)) => {
            let (mut parts, body) = response.into_parts();

            let response_body = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(%error, %correlation_id, "failed to buffer response body");
                    // The length of the original body no longer applies.
                    parts.headers.remove(CONTENT_LENGTH);
                    Bytes::new()
                }
            };

            call.response_status_code = parts.status.as_u16().to_string();
            call.response_content = lossy_truncated(&response_body, max_logged_body);
            call.response_message = header_str(&parts.headers, &X_RESPONSE_MESSAGE);
            call.response_time_ms = response_time(&parts.headers, &X_RESPONSE_TIME, elapsed_ms);

            if let Some(fault) = parts
                .extensions
                .get::<Fault>()
                .cloned()
                .or_else(|| Fault::from_headers(&parts.headers))
            {
                call.response_exception = fault.message;
                call.response_stack_trace = fault.stack_trace;
            }

            span.record("http.response.status_code", parts.status.as_u16());
            if parts.status.is_server_error() {
                span.record("otel.status_code", "Error");
            }

            span.in_scope(|| call.emit());

            Ok(Response::from_parts(parts, Body::from(response_body)))
        }
        Ok(Err(error)) => {
            let fault = Fault::from_error(&error);
            finish_with_fault(&span, call, fault, elapsed_ms);

            Err(error)
        }
        Err(payload) => {
            let fault = Fault::from_panic(payload.as_ref());
            finish_with_fault(&span, call, fault, elapsed_ms);

            std::panic::resume_unwind(payload)
        }
    }
}

/// Records a failed exchange. No response exists, so status code and body
/// stay empty.
fn finish_with_fault(span: &Span, mut call: ServiceCall, fault: Fault, elapsed_ms: u128) {
    span.record("otel.status_code", "Error")
        .record("otel.status_message", fault.message.as_str());

    span.in_scope(|| {
        fault.emit("Downstream service failed while capturing the service call.");

        call.response_time_ms = elapsed_ms.to_string();
        call.response_exception = fault.message;
        call.response_stack_trace = fault.stack_trace;
        call.emit();
    });
}

fn response_time(headers: &HeaderMap, name: &HeaderName, measured_ms: u128) -> String {
    let reported = header_str(headers, name);

    if reported.is_empty() {
        measured_ms.to_string()
    } else {
        reported
    }
}

fn lossy_truncated(bytes: &Bytes, max_len: usize) -> String {
    let end = bytes.len().min(max_len);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Creates the `service_call` span, parented on the trace context of the
/// incoming request headers.
///
/// The span name follows the `{method} {http.route}` format of the HTTP span
/// semantic conventions. Since the tracing crate only allows 'static span
/// names, the special `otel.name` field carries the actual name.
fn service_call_span(parts: &Parts, correlation_id: &CorrelationId) -> Span {
    let http_method = parts.method.as_str();
    let span_name = match parts.extensions.get::<MatchedPath>() {
        Some(matched_path) => format!("{http_method} {}", matched_path.as_str()),
        None => http_method.to_owned(),
    };

    let span = tracing::info_span!(
        "service_call",
        otel.name = span_name,
        otel.kind = ?SpanKind::Server,
        otel.status_code = Empty,
        otel.status_message = Empty,
        http.request.method = http_method,
        http.response.status_code = Empty,
        url.path = parts.uri.path(),
        url.query = parts.uri.query(),
        correlation_id = %correlation_id,
    );

    let parent = TraceParentHeaders(&parts.headers).extract_context();
    if let Err(error) = span.set_parent(parent) {
        tracing::debug!(%error, "unable to set parent of service call span");
    }

    span
}

/// Gives the globally installed propagator access to the trace parent
/// information in the request headers.
struct TraceParentHeaders<'a>(&'a HeaderMap);

impl TraceParentHeaders<'_> {
    fn extract_context(&self) -> OtelContext {
        opentelemetry::global::get_text_map_propagator(|propagator| propagator.extract(self))
    }
}

impl Extractor for TraceParentHeaders<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}
