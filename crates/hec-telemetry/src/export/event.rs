use std::time::{SystemTime, UNIX_EPOCH};

use convert_case::{Case, Casing};
use serde::Serialize;
use serde_json::{Map, Value};

/// One event of the HEC wire format.
///
/// ```json
/// { "time": 1700000000.123, "index": "main", "source": "orders", "event": { "message": "..." } }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HecEvent {
    /// Unix timestamp in seconds, with millisecond precision.
    pub time: f64,
    pub index: String,
    pub source: String,
    pub event: Map<String, Value>,
}

/// The request body of one HEC POST.
#[derive(Debug, Serialize)]
pub(crate) struct HecBatch<'a> {
    pub events: &'a [HecEvent],
}

/// Converts `time` into unix seconds, truncated to milliseconds. Times before
/// the epoch map to zero.
pub fn unix_seconds(time: SystemTime) -> f64 {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default();

    millis as f64 / 1000.0
}

/// Converts an attribute key into the lowerCamelCase payload key, like
/// `response_status_code` into `responseStatusCode`.
pub fn payload_key(key: &str) -> String {
    key.replace('.', "_").to_case(Case::Camel)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("response_status_code", "responseStatusCode")]
    #[case("correlation_id", "correlationId")]
    #[case("exception.stacktrace", "exceptionStacktrace")]
    #[case("message", "message")]
    fn converts_payload_keys(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(payload_key(key), expected);
    }

    #[rstest]
    #[case(Duration::from_millis(1_700_000_000_123), 1_700_000_000.123)]
    #[case(Duration::from_micros(1_500_999), 1.5)]
    #[case(Duration::ZERO, 0.0)]
    fn converts_to_unix_seconds(#[case] since_epoch: Duration, #[case] expected: f64) {
        assert_eq!(unix_seconds(UNIX_EPOCH + since_epoch), expected);
    }

    #[test]
    fn serializes_batch() {
        let event = HecEvent {
            time: 1.5,
            index: "main".to_owned(),
            source: "orders".to_owned(),
            event: Map::from_iter([("message".to_owned(), json!("placed"))]),
        };

        let body = serde_json::to_value(HecBatch { events: &[event] }).unwrap();

        assert_eq!(
            body,
            json!({
                "events": [{
                    "time": 1.5,
                    "index": "main",
                    "source": "orders",
                    "event": { "message": "placed" }
                }]
            })
        );
    }
}
