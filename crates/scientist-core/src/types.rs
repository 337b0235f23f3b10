//! Core types for experiments
//!
//! Defines the fundamental types shared by the engine:
//! - Experiment configuration
//! - Run context threaded through behaviors
//! - Hook signatures
//! - Execution strategy selection

use crate::error::ResultError;
use crate::result::ExperimentResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reserved name of the authoritative behavior
pub const CONTROL: &str = "control";

/// Reserved name of the canonical candidate behavior
pub const CANDIDATE: &str = "candidate";

/// A behavior under comparison
pub type BehaviorFn<T> = Arc<dyn Fn(&RunContext) -> anyhow::Result<T> + Send + Sync>;

/// `(control, candidate) -> matched`
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> anyhow::Result<bool> + Send + Sync>;

/// `(control, candidate) -> should_ignore`
///
/// A side is `None` when that behavior errored.
pub type IgnoreFn<T> = Arc<dyn Fn(Option<&T>, Option<&T>) -> anyhow::Result<bool> + Send + Sync>;

/// Normalizes a value before it is handed to publishers
pub type CleanFn<T> = Arc<dyn Fn(&T) -> anyhow::Result<T> + Send + Sync>;

/// Enablement gate
pub type RunIfFn = Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

/// Pre-run hook
pub type BeforeRunFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Receives every completed result
pub type PublishFn<T> = Arc<dyn Fn(&ExperimentResult<T>) -> anyhow::Result<()> + Send + Sync>;

/// Receives the operational errors of a run
pub type ReportFn = Arc<dyn Fn(&[ResultError]) + Send + Sync>;

/// Experiment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Experiment name
    pub name: String,
    /// Return a mismatch error instead of the control value
    pub error_on_mismatches: bool,
    /// Free-form metadata attached to every result
    pub context: HashMap<String, String>,
    /// Run candidates at all
    pub enabled: bool,
}

impl ExperimentConfig {
    /// Create configuration with defaults for `name`
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// With mismatch raising
    #[inline]
    #[must_use]
    pub fn with_error_on_mismatches(mut self, enabled: bool) -> Self {
        self.error_on_mismatches = enabled;
        self
    }

    /// With a context entry
    #[inline]
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// With enablement
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "experiment".to_string(),
            error_on_mismatches: false,
            context: HashMap::new(),
            enabled: true,
        }
    }
}

/// Cancellation and deadline token passed to every behavior
///
/// The engine never cancels on its own; behaviors poll it cooperatively.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    /// Context with no deadline
    #[inline]
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires at `deadline`
    #[inline]
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::default(),
        }
    }

    /// Context that expires `timeout` from now
    #[inline]
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Deadline, if any
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Signal cancellation to every clone of this context
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancelled explicitly or past the deadline
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// How the behaviors of one run are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Control first, then candidates in registration order
    Sequential,
    /// Every behavior on its own task, shuffled, joined before classification
    Concurrent,
    /// Control inline, candidates detached in the background
    ConcurrentCandidates,
}

impl ExecutionStrategy {
    /// Name used in logs
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Concurrent => "concurrent",
            Self::ConcurrentCandidates => "concurrent_candidates",
        }
    }
}
