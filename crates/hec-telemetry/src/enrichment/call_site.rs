use std::{fmt, path::Path};

use tracing::Level;

use crate::CorrelationId;

/// The identity of the code which emits a log record.
///
/// A call site consists of a component (for example a type or module name)
/// and an operation (for example a function name). Both are attached to log
/// records as `classname` and `methodname` fields, which allows filtering all
/// records of one operation in the backend. A call site created inside a
/// request also carries its [`CorrelationId`], which joins its records to the
/// service call record of that request.
///
/// The operation name is sanitized on construction: every character outside
/// of `[A-Za-z0-9_.]` is removed.
///
/// ```
/// use hec_telemetry::CallSite;
///
/// let call_site = CallSite::new("ForecastService", "get<forecast>()");
/// assert_eq!(call_site.component(), "ForecastService");
/// assert_eq!(call_site.operation(), "getforecast");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallSite {
    component: String,
    operation: String,
    file_path: Option<String>,
    line: Option<u32>,
    instance: Option<String>,
    correlation_id: Option<CorrelationId>,
}

impl CallSite {
    /// Creates a call site from an explicit component and operation name.
    pub fn new(component: impl Into<String>, operation: impl AsRef<str>) -> Self {
        Self {
            component: component.into(),
            operation: sanitize_operation(operation.as_ref()),
            ..Default::default()
        }
    }

    /// Creates a call site whose component is the file name (without its
    /// extension) of `file_path`.
    ///
    /// This is what the [`call_site!`][crate::call_site] macro uses.
    pub fn from_path(file_path: impl AsRef<str>, operation: impl AsRef<str>) -> Self {
        let file_path = file_path.as_ref();
        let component = Path::new(file_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            component,
            operation: sanitize_operation(operation.as_ref()),
            file_path: Some(file_path.to_owned()),
            ..Default::default()
        }
    }

    /// Attaches the source line, which is emitted as the `line` field.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Attaches an instance discriminator, for example a correlation id.
    ///
    /// The instance is not emitted as a field, but it is part of the
    /// [`TimerKey`][crate::timer::TimerKey]. Concurrent invocations of the
    /// same operation need distinct instances to time independently.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Attaches the id of the request this call site runs in. It is emitted
    /// as the `correlation_id` field by every record of this call site.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Emits the `Started {methodname} in {classname}.` record at INFO level.
    pub fn started(&self) {
        tracing::info!(
            classname = %self.component,
            methodname = %self.operation,
            correlation_id = self.correlation_id.as_ref().map(CorrelationId::as_str),
            "Started `{}` in `{}`.",
            self.operation,
            self.component
        );
    }

    /// Emits `message` at `level`, carrying the full call site as fields.
    pub fn log(&self, level: Level, message: &str) {
        let file_path = self.file_path.as_deref().unwrap_or_default();
        let line = self.line.unwrap_or_default();

        event_at!(
            level,
            classname = %self.component,
            methodname = %self.operation,
            file_path,
            line,
            correlation_id = self.correlation_id.as_ref().map(CorrelationId::as_str),
            "{message}"
        );
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.component, self.operation)?;

        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }

        Ok(())
    }
}

fn sanitize_operation(operation: &str) -> String {
    operation
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
        .collect()
}
