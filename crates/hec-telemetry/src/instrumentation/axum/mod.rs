//! Tower [`Layer`][tower::Layer]s for axum routers.
//!
//! - [`CaptureLayer`] emits one [`ServiceCall`][crate::ServiceCall] record
//!   per request, carrying the buffered request and response bodies, the
//!   status code, the latency and failure details.
//! - [`FaultLayer`] turns errors and panics of the wrapped service into a
//!   generic `500 Internal Server Error` response.
//!
//! Both layers communicate through the signaling headers defined in this
//! module and through the [`Fault`] response extension. The [`FaultLayer`]
//! has to be the outer layer:
//!
//! ```
//! use axum::{Router, routing::get};
//! use hec_telemetry::{CaptureLayer, FaultLayer};
//! use tower::ServiceBuilder;
//!
//! let router = Router::new()
//!     .route("/", get(|| async { "Hello, World!" }))
//!     .layer(
//!         ServiceBuilder::new()
//!             .layer(FaultLayer::new())
//!             .layer(CaptureLayer::new()),
//!     );
//!
//! # let _: Router = router;
//! ```
use axum::http::{HeaderMap, HeaderName, HeaderValue};

mod capture;
mod correlation;
mod fault;

pub use capture::*;
pub use correlation::*;
pub use fault::*;

/// Carries the message of an unhandled failure.
pub const X_RESPONSE_EXCEPTION: HeaderName = HeaderName::from_static("x-response-exception");

/// Carries the rendered cause chain of an unhandled failure.
pub const X_RESPONSE_STACK_TRACE: HeaderName = HeaderName::from_static("x-response-stacktrace");

/// Carries a free-form message a handler wants to attach to the service
/// call record.
pub const X_RESPONSE_MESSAGE: HeaderName = HeaderName::from_static("x-response-message");

/// Carries a response time (in milliseconds) measured by the handler itself.
/// When absent, the [`CaptureLayer`] measures the time on its own.
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

/// Header values are capped at this many bytes.
const MAX_HEADER_VALUE_LEN: usize = 4096;

/// Returns the value of header `name` as string, or an empty string if it is
/// missing or not valid visible ASCII.
pub(crate) fn header_str(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

/// Converts arbitrary text into a [`HeaderValue`].
///
/// Characters which are not allowed in header values (like line breaks or
/// non-ASCII characters) are replaced by spaces and the value is truncated.
pub(crate) fn header_value_lossy(value: &str) -> HeaderValue {
    let sanitized: String = value
        .chars()
        .map(|c| if c == '\t' || (' '..='~').contains(&c) { c } else { ' ' })
        .take(MAX_HEADER_VALUE_LEN)
        .collect();

    HeaderValue::from_str(&sanitized).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("plain", "plain")]
    #[case("line\nbreak", "line break")]
    #[case("tab\tstays", "tab\tstays")]
    #[case("grüße", "gr  e")]
    fn sanitizes_header_values(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(header_value_lossy(input), expected);
    }

    #[test]
    fn truncates_header_values() {
        let long = "x".repeat(MAX_HEADER_VALUE_LEN * 2);

        assert_eq!(header_value_lossy(&long).len(), MAX_HEADER_VALUE_LEN);
    }

    #[test]
    fn missing_header_is_empty() {
        assert_eq!(header_str(&HeaderMap::new(), &X_RESPONSE_MESSAGE), "");
    }
}
