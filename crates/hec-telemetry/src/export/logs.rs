use opentelemetry_sdk::{
    error::OTelSdkResult,
    logs::{LogBatch, LogExporter, SdkLogRecord},
};
use opentelemetry_semantic_conventions::attribute::{EXCEPTION_MESSAGE, EXCEPTION_STACKTRACE};
use serde_json::{Map, Value};
use snafu::ResultExt as _;

use super::{
    ExportRuntime, HecClient, HecError, HecEvent, HecOptions, NoRuntimeSnafu, payload_key, record,
};
use crate::enrichment::fields;

/// Attributes which are mapped onto fixed payload keys and are therefore not
/// flattened into the payload.
const MAPPED_ATTRIBUTES: [&str; 6] = [
    fields::CLASS_NAME,
    fields::METHOD_NAME,
    fields::FILE_PATH,
    fields::LINE,
    EXCEPTION_MESSAGE,
    EXCEPTION_STACKTRACE,
];

/// Exports log records to a HEC endpoint, one POST per batch.
///
/// Every record becomes one [`HecEvent`] whose payload always contains the
/// keys `message`, `severity`, `category`, `eventId`, `traceId`, `spanId`,
/// `exception`, `methodName`, `className`, `filePath` and `lineNumber`.
/// Missing values are empty strings. All other attributes of the record are
/// added with their keys converted to lowerCamelCase.
#[derive(Debug)]
pub struct HecLogExporter {
    client: HecClient,
    runtime: ExportRuntime,
}

impl HecLogExporter {
    /// Creates the exporter. Must be called from within a tokio runtime,
    /// which is then used for all exports.
    pub fn new(options: HecOptions) -> Result<Self, HecError> {
        Ok(Self {
            runtime: ExportRuntime::current().context(NoRuntimeSnafu)?,
            client: HecClient::new(options)?,
        })
    }

    /// Converts one record into its wire representation.
    pub fn to_event(&self, record: &SdkLogRecord) -> HecEvent {
        self.client.event(record::timestamp(record), log_payload(record))
    }
}

impl LogExporter for HecLogExporter {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        let events: Vec<HecEvent> = batch
            .iter()
            .map(|(record, _scope)| self.to_event(record))
            .collect();

        if events.is_empty() {
            return Ok(());
        }

        let client = self.client.clone();
        self.runtime
            .run("hec_log", async move { client.post(&events).await })
            .await
    }
}

fn log_payload(record: &SdkLogRecord) -> Map<String, Value> {
    let mut payload: Map<String, Value> = record
        .attributes_iter()
        .filter(|(key, _)| !MAPPED_ATTRIBUTES.contains(&key.as_str()))
        .map(|(key, value)| (payload_key(key.as_str()), record::to_json(value)))
        .collect();

    let (trace_id, span_id) = record
        .trace_context()
        .map(|context| (context.trace_id.to_string(), context.span_id.to_string()))
        .unwrap_or_default();

    let fixed = [
        ("message", record::message(record)),
        ("severity", record::severity(record)),
        (
            "category",
            record.target().map(ToString::to_string).unwrap_or_default(),
        ),
        (
            "eventId",
            record.event_name().map(ToOwned::to_owned).unwrap_or_default(),
        ),
        ("traceId", trace_id),
        ("spanId", span_id),
        ("exception", record::exception(record).unwrap_or_default()),
        (
            "methodName",
            record::attribute_text(record, fields::METHOD_NAME),
        ),
        ("className", record::attribute_text(record, fields::CLASS_NAME)),
        ("filePath", record::attribute_text(record, fields::FILE_PATH)),
        ("lineNumber", record::attribute_text(record, fields::LINE)),
    ];

    for (key, value) in fixed {
        payload.insert(key.to_owned(), Value::String(value));
    }

    payload
}
