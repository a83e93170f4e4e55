//! This crate contains a lightweight telemetry pipeline for axum based web
//! services: execution timers, call-site enrichment for log records, request
//! and failure capture middlewares, and exporters which ship log and trace
//! records to an HTTP Event Collector (HEC) or a SQL table.
//!
//! To get started, see [`Tracing`] for installing the pipeline and
//! [`CaptureLayer`] / [`FaultLayer`] for instrumenting a router.
#[macro_use]
mod macros;

pub mod enrichment;
pub mod export;
pub mod instrumentation;
pub mod timer;
pub mod tracing;

#[cfg(test)]
pub(crate) mod test_util;

pub use enrichment::{CallSite, ServiceCall};
pub use instrumentation::{CaptureLayer, CorrelationId, FaultLayer};
pub use timer::ExecutionTimer;
pub use tracing::Tracing;
