//! Read access to the parts of an [`SdkLogRecord`] shared by all log
//! exporters.
use std::time::SystemTime;

use opentelemetry::{Key, logs::AnyValue};
use opentelemetry_sdk::logs::SdkLogRecord;
use opentelemetry_semantic_conventions::attribute::{EXCEPTION_MESSAGE, EXCEPTION_STACKTRACE};
use serde_json::{Map, Value};

/// The record timestamp, falling back to the observed timestamp and then to
/// the current time.
pub(super) fn timestamp(record: &SdkLogRecord) -> SystemTime {
    record
        .timestamp()
        .or_else(|| record.observed_timestamp())
        .unwrap_or_else(SystemTime::now)
}

pub(super) fn severity(record: &SdkLogRecord) -> String {
    match (record.severity_text(), record.severity_number()) {
        (Some(text), _) => text.to_owned(),
        (None, Some(number)) => format!("{number:?}"),
        (None, None) => String::new(),
    }
}

/// The formatted message of the record.
pub(super) fn message(record: &SdkLogRecord) -> String {
    record.body().map(to_text).unwrap_or_default()
}

pub(super) fn attribute<'a>(record: &'a SdkLogRecord, key: &str) -> Option<&'a AnyValue> {
    record
        .attributes_iter()
        .find(|(k, _)| k.as_str() == key)
        .map(|(_, value)| value)
}

pub(super) fn attribute_text(record: &SdkLogRecord, key: &str) -> String {
    attribute(record, key).map(to_text).unwrap_or_default()
}

/// The exception message followed by the stack trace, if the record carries
/// an exception.
pub(super) fn exception(record: &SdkLogRecord) -> Option<String> {
    let message = attribute_text(record, EXCEPTION_MESSAGE);
    let stack_trace = attribute_text(record, EXCEPTION_STACKTRACE);

    match (message.is_empty(), stack_trace.is_empty()) {
        (true, true) => None,
        (false, true) => Some(message),
        (true, false) => Some(stack_trace),
        (false, false) => Some(format!("{message}\n{stack_trace}")),
    }
}

/// Renders a value as plain text. Strings are not quoted.
pub(super) fn to_text(value: &AnyValue) -> String {
    match value {
        AnyValue::String(value) => value.as_str().to_owned(),
        other => to_json(other).to_string(),
    }
}

pub(super) fn to_json(value: &AnyValue) -> Value {
    match value {
        AnyValue::Int(value) => Value::from(*value),
        AnyValue::Double(value) => Value::from(*value),
        AnyValue::String(value) => Value::from(value.as_str()),
        AnyValue::Boolean(value) => Value::from(*value),
        AnyValue::Bytes(bytes) => Value::from(bytes.as_slice()),
        AnyValue::ListAny(values) => values.iter().map(to_json).collect(),
        AnyValue::Map(entries) => entries
            .iter()
            .map(|(key, value): (&Key, &AnyValue)| (key.as_str().to_owned(), to_json(value)))
            .collect::<Map<_, _>>()
            .into(),
        _ => Value::Null,
    }
}
