use opentelemetry::{Value as AttributeValue, trace::Status};
use opentelemetry_sdk::{
    error::OTelSdkResult,
    trace::{SpanData, SpanExporter},
};
use serde_json::{Map, Value, json};
use snafu::ResultExt as _;

use super::{ExportRuntime, HecClient, HecError, HecEvent, HecOptions, NoRuntimeSnafu};

/// Exports finished spans to a HEC endpoint, one POST per batch.
///
/// The event time is the span start. The payload contains `traceId`,
/// `spanId`, `parentSpanId`, `operationName`, `kind`, `startTime` (RFC 3339),
/// `duration` (milliseconds), `status` and `tags` (the span attributes).
#[derive(Debug)]
pub struct HecSpanExporter {
    client: HecClient,
    runtime: ExportRuntime,
}

impl HecSpanExporter {
    /// Creates the exporter. Must be called from within a tokio runtime,
    /// which is then used for all exports.
    pub fn new(options: HecOptions) -> Result<Self, HecError> {
        Ok(Self {
            runtime: ExportRuntime::current().context(NoRuntimeSnafu)?,
            client: HecClient::new(options)?,
        })
    }

    pub fn to_event(&self, span: &SpanData) -> HecEvent {
        self.client.event(span.start_time, span_payload(span))
    }
}

impl SpanExporter for HecSpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        if batch.is_empty() {
            return Ok(());
        }

        let events: Vec<HecEvent> = batch.iter().map(|span| self.to_event(span)).collect();
        let client = self.client.clone();

        self.runtime
            .run("hec_trace", async move { client.post(&events).await })
            .await
    }
}

fn span_payload(span: &SpanData) -> Map<String, Value> {
    let duration = span
        .end_time
        .duration_since(span.start_time)
        .unwrap_or_default();

    let status = match &span.status {
        Status::Error { description } => format!("Error: {description}"),
        Status::Ok => "Ok".to_owned(),
        _ => "Unset".to_owned(),
    };

    let tags: Map<String, Value> = span
        .attributes
        .iter()
        .map(|attribute| {
            (
                attribute.key.as_str().to_owned(),
                attribute_to_json(&attribute.value),
            )
        })
        .collect();

    Map::from_iter([
        (
            "traceId".to_owned(),
            json!(span.span_context.trace_id().to_string()),
        ),
        (
            "spanId".to_owned(),
            json!(span.span_context.span_id().to_string()),
        ),
        ("parentSpanId".to_owned(), json!(span.parent_span_id.to_string())),
        ("operationName".to_owned(), json!(span.name)),
        ("kind".to_owned(), json!(format!("{:?}", span.span_kind))),
        (
            "startTime".to_owned(),
            json!(humantime::format_rfc3339_millis(span.start_time).to_string()),
        ),
        ("duration".to_owned(), json!(duration.as_micros() as f64 / 1000.0)),
        ("status".to_owned(), json!(status)),
        ("tags".to_owned(), Value::Object(tags)),
    ])
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Bool(value) => json!(value),
        AttributeValue::I64(value) => json!(value),
        AttributeValue::F64(value) => json!(value),
        other => json!(other.as_str()),
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, UNIX_EPOCH};

    use axum::http::StatusCode;
    use opentelemetry::{
        KeyValue,
        trace::{Span as _, SpanKind, Tracer as _, TracerProvider as _},
    };
    use opentelemetry_sdk::{
        error::OTelSdkError,
        trace::{InMemorySpanExporter, SdkTracerProvider},
    };

    use super::*;
    use crate::test_util::Collector;

    fn finished_spans() -> Vec<SpanData> {
        let memory = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(memory.clone())
            .build();
        let tracer = provider.tracer("test");

        let start = UNIX_EPOCH + Duration::from_millis(1_700_000_000_250);
        let mut span = tracer
            .span_builder("GET /forecast")
            .with_kind(SpanKind::Server)
            .with_start_time(start)
            .with_attributes([
                KeyValue::new("http.response.status_code", 200_i64),
                KeyValue::new("url.path", "/forecast"),
            ])
            .start(&tracer);
        span.set_status(Status::error("upstream timeout"));
        span.end_with_timestamp(start + Duration::from_millis(40));

        memory.get_finished_spans().unwrap()
    }

    #[test]
    fn builds_span_payload() {
        let spans = finished_spans();
        let payload = span_payload(&spans[0]);

        assert_eq!(payload["operationName"], "GET /forecast");
        assert_eq!(payload["kind"], "Server");
        assert_eq!(payload["startTime"], "2023-11-14T22:13:20.250Z");
        assert_eq!(payload["duration"], 40.0);
        assert_eq!(payload["status"], "Error: upstream timeout");
        assert_eq!(payload["parentSpanId"], "0000000000000000");
        assert_eq!(payload["tags"]["http.response.status_code"], 200);
        assert_eq!(payload["tags"]["url.path"], "/forecast");
        assert_eq!(payload["traceId"].as_str().map(str::len), Some(32));
    }

    #[tokio::test]
    async fn exports_spans_at_start_time() {
        let collector = Collector::start(StatusCode::OK).await;
        let exporter =
            HecSpanExporter::new(HecOptions::builder(collector.endpoint(), "t0k3n").build())
                .unwrap();

        exporter.export(finished_spans()).await.unwrap();

        let requests = collector.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].body["events"][0]["time"].as_f64(),
            Some(1_700_000_000.25)
        );
    }

    #[tokio::test]
    async fn empty_batch_is_skipped() {
        let collector = Collector::start(StatusCode::OK).await;
        let exporter =
            HecSpanExporter::new(HecOptions::builder(collector.endpoint(), "t0k3n").build())
                .unwrap();

        exporter.export(Vec::new()).await.unwrap();

        assert!(collector.requests().is_empty());
    }

    #[tokio::test]
    async fn rejected_batch_is_failure() {
        let collector = Collector::start(StatusCode::UNAUTHORIZED).await;
        let exporter =
            HecSpanExporter::new(HecOptions::builder(collector.endpoint(), "wrong").build())
                .unwrap();

        let result = exporter.export(finished_spans()).await;

        assert!(matches!(result, Err(OTelSdkError::InternalFailure(_))));
    }
}
