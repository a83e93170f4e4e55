//! Helpers which attach caller context and request metadata to log records
//! as separate structured fields.
//!
//! Field names used here are part of the contract with the exporters, which
//! look them up by name. See [`fields`].
mod call_site;
mod service_call;

pub use call_site::*;
pub use service_call::*;

/// Structured field names emitted by the enrichment helpers.
pub mod fields {
    /// The component (class) name of a call site.
    pub const CLASS_NAME: &str = "classname";

    /// The sanitized operation (method) name of a call site.
    pub const METHOD_NAME: &str = "methodname";

    /// The source file path of a call site.
    pub const FILE_PATH: &str = "file_path";

    /// The source line of a call site.
    pub const LINE: &str = "line";

    /// The correlation id of the request a record belongs to.
    pub const CORRELATION_ID: &str = "correlation_id";
}
