//! Run results and candidate classification
//!
//! Every candidate observation is classified against the control:
//! - **Matched**: the comparator (or error-message equality) says they agree
//! - **Ignored**: they disagree but an ignore predicate suppressed it
//! - **Mismatched**: they disagree and nothing suppressed it
//!
//! Hook failures during classification are recorded, never propagated.

use crate::error::{Operation, ResultError};
use crate::observation::Observation;
use crate::types::{CompareFn, ExecutionStrategy, IgnoreFn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of comparing one candidate to the control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Candidate agrees with the control
    Matched,
    /// Candidate disagrees but the difference is suppressed
    Ignored,
    /// Candidate disagrees
    Mismatched,
}

/// Completed experiment run
#[derive(Clone)]
pub struct ExperimentResult<T> {
    run_id: Uuid,
    experiment: Arc<str>,
    context: HashMap<String, String>,
    strategy: ExecutionStrategy,
    control: Observation<T>,
    candidates: Vec<(Observation<T>, Classification)>,
    errors: Vec<ResultError>,
}

impl<T> ExperimentResult<T> {
    /// Unique id of this run
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Experiment name
    #[inline]
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Experiment context at the time of the run
    #[inline]
    #[must_use]
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Strategy that produced this result
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Control observation
    #[inline]
    #[must_use]
    pub fn control(&self) -> &Observation<T> {
        &self.control
    }

    /// All observations, control first
    pub fn observations(&self) -> impl Iterator<Item = &Observation<T>> {
        std::iter::once(&self.control).chain(self.candidates())
    }

    /// All candidate observations
    pub fn candidates(&self) -> impl Iterator<Item = &Observation<T>> {
        self.candidates.iter().map(|(obs, _)| obs)
    }

    /// Candidates whose mismatch was suppressed
    pub fn ignored(&self) -> impl Iterator<Item = &Observation<T>> {
        self.with_classification(Classification::Ignored)
    }

    /// Candidates that disagree with the control
    pub fn mismatched(&self) -> impl Iterator<Item = &Observation<T>> {
        self.with_classification(Classification::Mismatched)
    }

    /// Candidates that agree with the control
    pub fn matched(&self) -> impl Iterator<Item = &Observation<T>> {
        self.with_classification(Classification::Matched)
    }

    /// Classification of the named candidate
    #[must_use]
    pub fn classification(&self, name: &str) -> Option<Classification> {
        self.candidates
            .iter()
            .find(|(obs, _)| obs.name() == name)
            .map(|(_, class)| *class)
    }

    /// No candidate mismatched or was ignored
    #[inline]
    #[must_use]
    pub fn is_matched(&self) -> bool {
        !self.is_mismatched() && !self.is_ignored()
    }

    /// At least one candidate mismatched
    #[inline]
    #[must_use]
    pub fn is_mismatched(&self) -> bool {
        self.mismatched().next().is_some()
    }

    /// At least one candidate was ignored
    #[inline]
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.ignored().next().is_some()
    }

    /// Operational errors recorded during the run
    #[inline]
    #[must_use]
    pub fn errors(&self) -> &[ResultError] {
        &self.errors
    }

    pub(crate) fn push_error(&mut self, error: ResultError) {
        self.errors.push(error);
    }

    pub(crate) fn into_control(self) -> Observation<T> {
        self.control
    }

    fn with_classification(&self, class: Classification) -> impl Iterator<Item = &Observation<T>> {
        self.candidates
            .iter()
            .filter(move |(_, c)| *c == class)
            .map(|(obs, _)| obs)
    }
}

impl<T: fmt::Debug> fmt::Debug for ExperimentResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentResult")
            .field("run_id", &self.run_id)
            .field("experiment", &self.experiment)
            .field("strategy", &self.strategy)
            .field("control", &self.control)
            .field("candidates", &self.candidates)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// Classification policy of one experiment
pub(crate) struct Classifier<'a, T> {
    pub(crate) experiment: &'a Arc<str>,
    pub(crate) context: &'a HashMap<String, String>,
    pub(crate) comparator: &'a CompareFn<T>,
    pub(crate) ignores: &'a [IgnoreFn<T>],
}

impl<T> Classifier<'_, T> {
    /// Classify every candidate and assemble the result
    ///
    /// `errors` carries operational errors recorded before classification
    /// (the pre-run hook); compare and ignore failures are appended to it.
    pub(crate) fn assemble(
        &self,
        strategy: ExecutionStrategy,
        control: Observation<T>,
        candidates: Vec<Observation<T>>,
        mut errors: Vec<ResultError>,
    ) -> ExperimentResult<T> {
        let candidates: Vec<_> = candidates
            .into_iter()
            .map(|candidate| {
                let class = self.classify(&control, &candidate, &mut errors);
                (candidate, class)
            })
            .collect();

        let result = ExperimentResult {
            run_id: Uuid::new_v4(),
            experiment: Arc::clone(self.experiment),
            context: self.context.clone(),
            strategy,
            control,
            candidates,
            errors,
        };

        tracing::info!(
            experiment = %result.experiment,
            run_id = %result.run_id,
            candidates = result.candidates.len(),
            mismatched = result.mismatched().count(),
            ignored = result.ignored().count(),
            "experiment classified"
        );

        result
    }

    /// Classify one candidate against the control
    pub(crate) fn classify(
        &self,
        control: &Observation<T>,
        candidate: &Observation<T>,
        errors: &mut Vec<ResultError>,
    ) -> Classification {
        if self.matches(control, candidate, errors) {
            Classification::Matched
        } else if self.ignores(control, candidate, errors) {
            Classification::Ignored
        } else {
            Classification::Mismatched
        }
    }

    fn matches(
        &self,
        control: &Observation<T>,
        candidate: &Observation<T>,
        errors: &mut Vec<ResultError>,
    ) -> bool {
        match (control.error(), candidate.error()) {
            (Some(a), Some(b)) => a.message() == b.message(),
            (None, None) => {
                let (Some(a), Some(b)) = (control.value(), candidate.value()) else {
                    return false;
                };
                match (self.comparator)(a, b) {
                    Ok(matched) => matched,
                    Err(err) => {
                        errors.push(self.hook_error(Operation::Compare, candidate, err));
                        false
                    }
                }
            }
            _ => false,
        }
    }

    /// First predicate returning true wins; failing predicates count as false
    fn ignores(
        &self,
        control: &Observation<T>,
        candidate: &Observation<T>,
        errors: &mut Vec<ResultError>,
    ) -> bool {
        for ignore in self.ignores {
            match ignore(control.value(), candidate.value()) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => errors.push(self.hook_error(Operation::Ignore, candidate, err)),
            }
        }
        false
    }

    fn hook_error(
        &self,
        operation: Operation,
        candidate: &Observation<T>,
        err: anyhow::Error,
    ) -> ResultError {
        tracing::warn!(
            experiment = %self.experiment,
            behavior = candidate.name(),
            operation = %operation,
            "hook failed: {err:#}"
        );
        ResultError::new(operation, self.experiment.to_string(), err).with_behavior(candidate.name())
    }
}
