use std::{convert::Infallible, fmt};

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderName, HeaderValue, request::Parts},
};
use uuid::Uuid;

/// The request header carrying the [`CorrelationId`].
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// A per-request token which links all records belonging to one request.
///
/// The id is taken from the `X-Correlation-ID` request header. If the header
/// is missing or empty, a random UUID is generated. The [`CaptureLayer`][1]
/// stores the id in the request extensions and writes it back into the
/// request headers, so downstream handlers can extract it:
///
/// ```
/// use axum::{Router, routing::get};
/// use hec_telemetry::{CaptureLayer, CorrelationId};
///
/// async fn handler(correlation_id: CorrelationId) -> String {
///     format!("handling {correlation_id}")
/// }
///
/// let router = Router::new()
///     .route("/", get(handler))
///     .layer(CaptureLayer::new());
/// # let _: Router = router;
/// ```
///
/// [1]: crate::CaptureLayer
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reads the id from the `X-Correlation-ID` header, if present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(X_CORRELATION_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the id of the request, creating and storing one if needed.
    ///
    /// Subsequent calls for the same request return the same id.
    pub(crate) fn ensure(parts: &mut Parts) -> Self {
        if let Some(id) = parts.extensions.get::<Self>() {
            return id.clone();
        }

        let id = Self::from_headers(&parts.headers).unwrap_or_else(Self::generate);

        if let Ok(value) = HeaderValue::from_str(&id.0) {
            parts.headers.insert(X_CORRELATION_ID, value);
        }

        parts.extensions.insert(id.clone());
        id
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::ensure(parts))
    }
}
