//! This module contains types which can be used as [`axum`][::axum] layers to
//! capture request/response metadata and unhandled failures.
pub mod axum;

pub use self::axum::{CaptureLayer, CorrelationId, Fault, FaultLayer};
