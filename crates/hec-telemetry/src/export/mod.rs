//! Exporters which ship OpenTelemetry log and span batches to an HTTP Event
//! Collector (HEC) or to a SQL table.
//!
//! All exporters are meant to be driven by the batch processors of the
//! [`opentelemetry_sdk`], which call them from a dedicated background thread.
//! Records are converted into owned values synchronously and the I/O is run
//! on the tokio runtime which was current when the exporter was constructed.
//! Any failure results in an [`OTelSdkError`]; the batch is dropped and never
//! retried.
//!
//! Exporters log their own failures under the [`EXPORT_TARGET`] target.
//! Events of this target must not be fed back into the exporters, which is
//! why [`Tracing`][crate::Tracing] disables it for all exporting layers.
use std::{error::Error, future::Future};

use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use tokio::runtime::{Handle, TryCurrentError};

mod client;
mod event;
mod logs;
mod record;
mod sql;
mod traces;

pub use client::*;
pub use event::*;
pub use logs::*;
pub use sql::*;
pub use traces::*;

/// The tracing target (prefix) of all events emitted by the exporters.
pub const EXPORT_TARGET: &str = "hec_telemetry::export";

/// The tokio runtime used to run export I/O.
#[derive(Clone, Debug)]
pub(crate) struct ExportRuntime(Handle);

impl ExportRuntime {
    /// Captures the runtime of the calling context.
    pub(crate) fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self)
    }

    /// Runs `task` to completion on the captured runtime.
    ///
    /// The returned future does not depend on a runtime context and can be
    /// awaited from any executor.
    pub(crate) async fn run<F, E>(&self, exporter: &'static str, task: F) -> OTelSdkResult
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Error + Send + 'static,
    {
        match self.0.spawn(task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                tracing::warn!(
                    exporter,
                    error = &error as &dyn Error,
                    "failed to export batch, dropping it"
                );
                Err(OTelSdkError::InternalFailure(error_chain(&error)))
            }
            Err(error) => {
                tracing::error!(exporter, %error, "export task did not complete");
                Err(OTelSdkError::InternalFailure(error.to_string()))
            }
        }
    }
}

/// Renders an error and all of its sources on one line.
fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();

    while let Some(error) = source {
        rendered.push_str(": ");
        rendered.push_str(&error.to_string());
        source = error.source();
    }

    rendered
}
