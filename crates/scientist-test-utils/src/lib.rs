//! Testing utilities for the scientist workspace
//!
//! Shared fixtures, recording hooks, and tracing setup.

#![allow(missing_docs)]

use parking_lot::Mutex;
use scientist_core::{Experiment, ExperimentResult, Operation, ResultError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber filtered by `RUST_LOG`, `warn` otherwise
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Control returns 1; candidates `candidate` = 2, `three` = 3, `correct` = 1
pub fn basic_experiment() -> Experiment<i32> {
    let mut experiment = Experiment::new("basic");
    experiment
        .control(|_| Ok(1))
        .candidate(|_| Ok(2))
        .behavior("three", |_| Ok(3))
        .behavior("correct", |_| Ok(1));
    experiment
}

/// Sorted behavior names of some observations
pub fn sorted_names<'a, T: 'a>(
    observations: impl Iterator<Item = &'a scientist_core::Observation<T>>,
) -> Vec<String> {
    let mut names: Vec<String> = observations.map(|o| o.name().to_string()).collect();
    names.sort();
    names
}

/// What a publisher saw, detached from the value type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSummary {
    pub experiment: String,
    pub control: String,
    pub candidates: Vec<String>,
    pub mismatched: Vec<String>,
    pub ignored: Vec<String>,
    pub context: HashMap<String, String>,
    pub errors: usize,
}

impl PublishedSummary {
    pub fn from_result<T>(result: &ExperimentResult<T>) -> Self {
        Self {
            experiment: result.experiment().to_string(),
            control: result.control().name().to_string(),
            candidates: sorted_names(result.candidates()),
            mismatched: sorted_names(result.mismatched()),
            ignored: sorted_names(result.ignored()),
            context: result.context().clone(),
            errors: result.errors().len(),
        }
    }
}

/// Publisher that remembers every result it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<PublishedSummary>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install on an experiment
    pub fn attach<T: Clone + Send + Sync + 'static>(&self, experiment: &mut Experiment<T>) {
        let published = Arc::clone(&self.published);
        experiment.publish(move |result| {
            published.lock().push(PublishedSummary::from_result(result));
            Ok(())
        });
    }

    pub fn published(&self) -> Vec<PublishedSummary> {
        self.published.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().len()
    }
}

/// Publisher that forwards summaries over a channel, for detached runs
pub fn channel_publisher<T: Clone + Send + Sync + 'static>(
    experiment: &mut Experiment<T>,
) -> mpsc::UnboundedReceiver<PublishedSummary> {
    let (tx, rx) = mpsc::unbounded_channel();
    experiment.publish(move |result| {
        let _ = tx.send(PublishedSummary::from_result(result));
        Ok(())
    });
    rx
}

/// Reporter that remembers every batch it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    batches: Arc<Mutex<Vec<Vec<ResultError>>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install on an experiment
    pub fn attach<T: Clone + Send + Sync + 'static>(&self, experiment: &mut Experiment<T>) {
        let batches = Arc::clone(&self.batches);
        experiment.report_errors(move |errors| {
            batches.lock().push(errors.to_vec());
        });
    }

    /// Number of reporter invocations
    pub fn calls(&self) -> usize {
        self.batches.lock().len()
    }

    /// Every reported error, flattened
    pub fn errors(&self) -> Vec<ResultError> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Reported error count per operation
    pub fn counts(&self) -> HashMap<Operation, usize> {
        let mut counts = HashMap::new();
        for err in self.errors() {
            *counts.entry(err.operation).or_insert(0) += 1;
        }
        counts
    }
}
