use std::time::{Duration, SystemTime};

use reqwest::{
    Client, StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue},
};
use serde_json::{Map, Value};
use snafu::{ResultExt as _, Snafu, ensure};
use url::Url;

use super::{HecBatch, HecEvent, unix_seconds};

type Result<T, E = HecError> = std::result::Result<T, E>;

/// Errors which can be encountered when talking to a HEC endpoint.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HecError {
    #[snafu(display("the HEC token is not a valid header value"))]
    InvalidToken { source: InvalidHeaderValue },

    #[snafu(display("failed to build the HTTP client"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("no tokio runtime is available to run exports on"))]
    NoRuntime {
        source: tokio::runtime::TryCurrentError,
    },

    #[snafu(display("failed to send events to {endpoint}"))]
    SendEvents { source: reqwest::Error, endpoint: Url },

    #[snafu(display("{endpoint} rejected the events with status {status}"))]
    Rejected { endpoint: Url, status: StatusCode },
}

/// Connection details of a HEC endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HecOptions {
    pub endpoint: Url,
    pub token: String,

    /// The destination index stamped onto every event.
    pub index: String,

    /// The destination source stamped onto every event.
    pub source: String,

    /// The authorization scheme sent in front of the token.
    pub scheme: String,

    /// The deadline of one POST, including connecting.
    pub timeout: Duration,
}

impl HecOptions {
    pub const DEFAULT_INDEX: &str = "main";
    pub const DEFAULT_SCHEME: &str = "Splunk";
    pub const DEFAULT_SOURCE: &str = env!("CARGO_PKG_NAME");
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn builder(endpoint: Url, token: impl Into<String>) -> HecOptionsBuilder {
        HecOptionsBuilder {
            options: Self {
                endpoint,
                token: token.into(),
                index: Self::DEFAULT_INDEX.to_owned(),
                source: Self::DEFAULT_SOURCE.to_owned(),
                scheme: Self::DEFAULT_SCHEME.to_owned(),
                timeout: Self::DEFAULT_TIMEOUT,
            },
        }
    }
}

/// For building [`HecOptions`].
pub struct HecOptionsBuilder {
    options: HecOptions,
}

impl HecOptionsBuilder {
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.options.index = index.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.options.source = source.into();
        self
    }

    /// Overrides the authorization scheme. Defaults to
    /// [`HecOptions::DEFAULT_SCHEME`].
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.options.scheme = scheme.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn build(self) -> HecOptions {
        self.options
    }
}

/// A client which POSTs batches of [`HecEvent`]s to one endpoint.
///
/// The authorization header is computed once. Cloning is cheap and clones
/// share the connection pool.
#[derive(Clone, Debug)]
pub struct HecClient {
    client: Client,
    endpoint: Url,
    index: String,
    source: String,
}

impl HecClient {
    pub fn new(options: HecOptions) -> Result<Self> {
        let HecOptions {
            endpoint,
            token,
            index,
            source,
            scheme,
            timeout,
        } = options;

        let mut authorization =
            HeaderValue::from_str(&format!("{scheme} {token}")).context(InvalidTokenSnafu)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context(BuildClientSnafu)?;

        Ok(Self {
            client,
            endpoint,
            index,
            source,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Wraps a payload into an event addressed to the configured index and
    /// source.
    pub fn event(&self, time: SystemTime, payload: Map<String, Value>) -> HecEvent {
        HecEvent {
            time: unix_seconds(time),
            index: self.index.clone(),
            source: self.source.clone(),
            event: payload,
        }
    }

    /// Sends all `events` in one request. Any non-success status is an error.
    pub async fn post(&self, events: &[HecEvent]) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&HecBatch { events })
            .send()
            .await
            .with_context(|_| SendEventsSnafu {
                endpoint: self.endpoint.clone(),
            })?;

        let status = response.status();
        ensure!(status.is_success(), RejectedSnafu {
            endpoint: self.endpoint.clone(),
            status
        });

        tracing::debug!(events = events.len(), endpoint = %self.endpoint, "sent events");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::UNIX_EPOCH;

    use serde_json::json;

    use super::*;
    use crate::test_util::{Collector, silent_endpoint, unreachable_endpoint};

    fn payload(message: &str) -> Map<String, Value> {
        Map::from_iter([("message".to_owned(), json!(message))])
    }

    #[test]
    fn builder_defaults() {
        let endpoint = "https://hec.example.com/services/collector".parse().unwrap();
        let options = HecOptions::builder(endpoint, "t0k3n")
            .with_index("orders")
            .build();

        assert_eq!(options.index, "orders");
        assert_eq!(options.source, "hec-telemetry");
        assert_eq!(options.scheme, "Splunk");
        assert_eq!(options.timeout, Duration::from_secs(10));
    }

    #[test]
    fn rejects_token_with_line_break() {
        let options = HecOptions::builder(
            "https://hec.example.com/services/collector".parse().unwrap(),
            "t0k3n\nX-Injected: 1",
        )
        .build();

        assert!(matches!(
            HecClient::new(options),
            Err(HecError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn posts_events_with_authorization() {
        let collector = Collector::start(StatusCode::OK).await;
        let client = HecClient::new(
            HecOptions::builder(collector.endpoint(), "t0k3n")
                .with_index("orders")
                .with_source("checkout")
                .build(),
        )
        .unwrap();

        let events = [
            client.event(UNIX_EPOCH, payload("first")),
            client.event(UNIX_EPOCH, payload("second")),
        ];
        client.post(&events).await.unwrap();

        let requests = collector.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].authorization.as_deref(), Some("Splunk t0k3n"));
        assert_eq!(
            requests[0].body,
            json!({
                "events": [
                    { "time": 0.0, "index": "orders", "source": "checkout", "event": { "message": "first" } },
                    { "time": 0.0, "index": "orders", "source": "checkout", "event": { "message": "second" } },
                ]
            })
        );
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let collector = Collector::start(StatusCode::SERVICE_UNAVAILABLE).await;
        let client =
            HecClient::new(HecOptions::builder(collector.endpoint(), "t0k3n").build()).unwrap();

        let result = client.post(&[client.event(UNIX_EPOCH, payload("lost"))]).await;

        assert!(matches!(
            result,
            Err(HecError::Rejected { status, .. }) if status == StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_error() {
        let client = HecClient::new(
            HecOptions::builder(unreachable_endpoint().await, "t0k3n")
                .with_timeout(Duration::from_secs(2))
                .build(),
        )
        .unwrap();

        let result = client.post(&[client.event(UNIX_EPOCH, payload("lost"))]).await;

        assert!(matches!(result, Err(HecError::SendEvents { .. })));
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        let client = HecClient::new(
            HecOptions::builder(silent_endpoint().await, "t0k3n")
                .with_timeout(Duration::from_millis(500))
                .build(),
        )
        .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.post(&[client.event(UNIX_EPOCH, payload("stuck"))]),
        )
        .await
        .expect("post should give up after the configured timeout");

        assert!(matches!(result, Err(HecError::SendEvents { .. })));
    }
}
