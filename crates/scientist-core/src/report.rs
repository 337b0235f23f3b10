//! Default publisher and error reporter
//!
//! Both defaults write to `tracing`; install a subscriber to see them.

use crate::error::ResultError;
use crate::result::ExperimentResult;
use crate::types::{PublishFn, ReportFn};
use std::sync::Arc;

/// Publisher that only emits a debug event
#[must_use]
pub fn default_publisher<T: 'static>() -> PublishFn<T> {
    Arc::new(|result: &ExperimentResult<T>| -> anyhow::Result<()> {
        tracing::debug!(
            experiment = result.experiment(),
            run_id = %result.run_id(),
            matched = result.is_matched(),
            "experiment result not published"
        );
        Ok(())
    })
}

/// Reporter that writes one error event per operational error
#[must_use]
pub fn default_reporter() -> ReportFn {
    Arc::new(|errors: &[ResultError]| {
        for err in errors {
            tracing::error!(
                operation = %err.operation,
                experiment = %err.experiment,
                behavior = err.behavior.as_deref().unwrap_or(""),
                "{}",
                format_error(err)
            );
        }
    })
}

/// Single diagnostic line for an operational error
///
/// Hook errors are type-erased `anyhow::Error`s, so the line carries the full
/// cause chain in place of a concrete error type name.
#[must_use]
pub fn format_error(err: &ResultError) -> String {
    format!(
        "[scientist] error during {:?} for {:?} experiment: {:#}",
        err.operation.as_str(),
        err.experiment,
        err.error
    )
}
