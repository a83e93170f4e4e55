/// The message of every service call record.
pub const SERVICE_CALL_MESSAGE: &str = "Service Call";

/// A structured record of one HTTP request/response exchange.
///
/// Every value is emitted as its own field instead of one concatenated
/// string, which enables filtering by status code or URI in the backend.
/// Values which are unknown stay empty strings, so that the exported payload
/// always has the same shape.
///
/// Usually this record is produced by the [`CaptureLayer`][crate::CaptureLayer],
/// but it can be emitted manually as well:
///
/// ```
/// use hec_telemetry::ServiceCall;
///
/// ServiceCall {
///     request_method: "GET".to_owned(),
///     request_uri: "/forecast".to_owned(),
///     response_status_code: "200".to_owned(),
///     ..Default::default()
/// }
/// .emit();
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceCall {
    pub correlation_id: String,
    pub request_method: String,
    pub request_uri: String,
    pub request_query: String,
    pub request_content: String,
    pub response_status_code: String,
    pub response_content: String,
    pub response_time_ms: String,
    pub response_message: String,
    pub response_exception: String,
    pub response_stack_trace: String,
}

impl ServiceCall {
    /// Emits the record as a single INFO event.
    pub fn emit(&self) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            request_method = %self.request_method,
            request_uri = %self.request_uri,
            request_query = %self.request_query,
            request_content = %self.request_content,
            response_status_code = %self.response_status_code,
            response_content = %self.response_content,
            response_time_ms = %self.response_time_ms,
            response_message = %self.response_message,
            response_exception = %self.response_exception,
            response_stack_trace = %self.response_stack_trace,
            "{SERVICE_CALL_MESSAGE}"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::CapturedEvents;

    #[test]
    fn emits_every_value_as_field() {
        let events = CapturedEvents::default();
        let call = ServiceCall {
            correlation_id: "abc".to_owned(),
            request_method: "POST".to_owned(),
            request_uri: "/echo".to_owned(),
            request_query: "?verbose=true".to_owned(),
            request_content: "ping".to_owned(),
            response_status_code: "201".to_owned(),
            response_content: "pong".to_owned(),
            response_time_ms: "3".to_owned(),
            ..Default::default()
        };

        events.scoped(|| call.emit());

        let captured = events.single();
        assert_eq!(captured.message(), SERVICE_CALL_MESSAGE);
        assert_eq!(captured.field("correlation_id"), "abc");
        assert_eq!(captured.field("request_method"), "POST");
        assert_eq!(captured.field("request_query"), "?verbose=true");
        assert_eq!(captured.field("request_content"), "ping");
        assert_eq!(captured.field("response_status_code"), "201");
        assert_eq!(captured.field("response_content"), "pong");
        assert_eq!(captured.field("response_exception"), "");
    }
}
