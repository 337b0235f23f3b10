//! Error types for the experiment engine
//!
//! Three families of failure flow through an experiment:
//! - Behavior errors, carried inside observations and only surfaced to the
//!   caller when they belong to the control
//! - Operational errors from hooks (gate, pre-run, compare, ignore, publish),
//!   collected as [`ResultError`] and handed to the error reporter
//! - Caller-facing [`ExperimentError`], which is the control's own error, a
//!   gate failure, or an opt-in [`MismatchError`]

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Hook and behavior errors are shared so observations and reports stay cloneable
pub type SharedError = Arc<anyhow::Error>;

/// Error returned to the caller of a run entry point
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExperimentError {
    /// The control behavior itself failed
    #[error(transparent)]
    Behavior(#[from] BehaviorError),

    /// A candidate mismatched and the experiment raises on mismatches
    #[error(transparent)]
    Mismatch(#[from] MismatchError),

    /// The enablement gate failed; no behavior was executed
    #[error("{0}")]
    RunIf(SharedError),

    /// The run value was not of the type the caller asserted
    #[error("[scientist] bad result type: {value} ({type_name})")]
    BadResultType {
        /// Debug rendering of the offending value
        value: String,
        /// Concrete type of the offending value
        type_name: &'static str,
    },
}

impl ExperimentError {
    /// Check if this error was raised because candidates mismatched
    #[inline]
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }

    /// The control's own error, if that is what this is
    #[inline]
    #[must_use]
    pub fn as_behavior(&self) -> Option<&BehaviorError> {
        match self {
            Self::Behavior(err) => Some(err),
            _ => None,
        }
    }
}

/// Failure of a single behavior invocation
#[derive(Debug, Clone, thiserror::Error)]
pub enum BehaviorError {
    /// The behavior returned an error
    #[error("{0}")]
    Failed(SharedError),

    /// The behavior panicked; the payload is rendered as the message
    #[error("{payload}")]
    Panicked {
        /// Name of the behavior that panicked
        behavior: String,
        /// Panic payload rendered as text
        payload: String,
    },

    /// No behavior is registered under the requested name
    #[error("[scientist] behavior {behavior:?} not found")]
    NotFound {
        /// Requested behavior name
        behavior: String,
    },

    /// The task running the behavior ended without reporting an outcome
    #[error("[scientist] behavior {behavior:?} did not report an outcome")]
    Lost {
        /// Name of the behavior whose outcome was lost
        behavior: String,
    },
}

impl BehaviorError {
    /// Wrap an error returned by a behavior
    #[inline]
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(error.into()))
    }

    /// Short classification used in diagnostics
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Panicked { .. } => "panicked",
            Self::NotFound { .. } => "not_found",
            Self::Lost { .. } => "lost",
        }
    }

    /// Textual message, the basis for error-vs-error matching
    #[inline]
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Hook that produced an operational error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Enablement gate
    RunIf,
    /// Pre-run hook
    BeforeRun,
    /// Comparator
    Compare,
    /// Ignore predicate
    Ignore,
    /// Publisher
    Publish,
}

impl Operation {
    /// Wire name of the operation
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunIf => "run_if",
            Self::BeforeRun => "before_run",
            Self::Compare => "compare",
            Self::Ignore => "ignore",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational failure recorded during a run
///
/// Used only for reporting. The display form is the underlying message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct ResultError {
    /// Hook that failed
    pub operation: Operation,
    /// Experiment the hook belongs to
    pub experiment: String,
    /// Candidate being classified, for `compare` and `ignore`
    pub behavior: Option<String>,
    /// Underlying error
    pub error: SharedError,
}

impl ResultError {
    /// Create new result error for an experiment-level hook
    #[inline]
    pub fn new(
        operation: Operation,
        experiment: impl Into<String>,
        error: impl Into<SharedError>,
    ) -> Self {
        Self {
            operation,
            experiment: experiment.into(),
            behavior: None,
            error: error.into(),
        }
    }

    /// Attach the candidate behavior name
    #[inline]
    #[must_use]
    pub fn with_behavior(mut self, behavior: impl Into<String>) -> Self {
        self.behavior = Some(behavior.into());
        self
    }
}

/// Raised instead of the control value when candidates mismatched
///
/// Wraps the completed result; recover it with [`MismatchError::result`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("[scientist] experiment {experiment:?} observations mismatched: {mismatched:?}")]
pub struct MismatchError {
    experiment: String,
    mismatched: Vec<String>,
    result: Arc<dyn Any + Send + Sync>,
}

impl MismatchError {
    pub(crate) fn new(
        experiment: impl Into<String>,
        mismatched: Vec<String>,
        result: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            mismatched,
            result,
        }
    }

    /// Name of the experiment that mismatched
    #[inline]
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Names of the mismatched candidates
    #[inline]
    #[must_use]
    pub fn mismatched(&self) -> &[String] {
        &self.mismatched
    }

    /// The wrapped result, if `T` is the experiment's value type
    #[inline]
    #[must_use]
    pub fn result<T: 'static>(&self) -> Option<&crate::result::ExperimentResult<T>> {
        self.result.downcast_ref()
    }
}
