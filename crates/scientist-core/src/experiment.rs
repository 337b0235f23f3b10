//! Experiment configuration and run entry points
//!
//! An [`Experiment`] owns the named behaviors and every policy hook. It is
//! configured up front and then run any number of times; each run produces a
//! fresh [`ExperimentResult`] that is published and then dropped. Callers only
//! ever receive the control's outcome, a gate error, or an opt-in mismatch
//! error.

use crate::error::{ExperimentError, MismatchError, Operation, ResultError};
use crate::observation::observe;
use crate::report;
use crate::result::{Classifier, ExperimentResult};
use crate::types::{
    BeforeRunFn, BehaviorFn, CleanFn, CompareFn, ExperimentConfig, IgnoreFn, PublishFn, ReportFn,
    RunContext, RunIfFn, CANDIDATE, CONTROL,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// A named comparison between a control behavior and its candidates
///
/// Configuration methods take `&mut self`; runs take `&self`. The registry is
/// read without locking, so do not reconfigure an experiment while a run is in
/// flight.
#[derive(Clone)]
pub struct Experiment<T> {
    pub(crate) name: Arc<str>,
    pub(crate) context: HashMap<String, String>,
    pub(crate) error_on_mismatches: bool,
    pub(crate) behaviors: IndexMap<String, BehaviorFn<T>>,
    pub(crate) comparator: CompareFn<T>,
    pub(crate) ignores: Vec<IgnoreFn<T>>,
    pub(crate) cleaner: CleanFn<T>,
    pub(crate) run_if: RunIfFn,
    pub(crate) before_run: BeforeRunFn,
    pub(crate) publisher: PublishFn<T>,
    pub(crate) reporter: ReportFn,
}

impl<T> Experiment<T>
where
    T: PartialEq + Clone + Send + Sync + 'static,
{
    /// Create new experiment compared by structural equality
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_comparator(name, |control: &T, candidate: &T| Ok(control == candidate))
    }

    /// Create experiment from configuration
    #[must_use]
    pub fn from_config(config: ExperimentConfig) -> Self {
        let mut experiment = Self::new(config.name);
        experiment.context = config.context;
        experiment.error_on_mismatches = config.error_on_mismatches;
        if !config.enabled {
            experiment.run_if(|| Ok(false));
        }
        experiment
    }
}

impl<T> Experiment<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create experiment with a custom comparator
    ///
    /// Use this for value types without `PartialEq`.
    #[must_use]
    pub fn with_comparator<F>(name: impl Into<String>, comparator: F) -> Self
    where
        F: Fn(&T, &T) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            context: HashMap::new(),
            error_on_mismatches: false,
            behaviors: IndexMap::new(),
            comparator: Arc::new(comparator),
            ignores: Vec::new(),
            cleaner: Arc::new(|value: &T| -> anyhow::Result<T> { Ok(value.clone()) }),
            run_if: Arc::new(|| -> anyhow::Result<bool> { Ok(true) }),
            before_run: Arc::new(|| -> anyhow::Result<()> { Ok(()) }),
            publisher: report::default_publisher(),
            reporter: report::default_reporter(),
        }
    }

    /// Experiment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata attached to every result
    #[inline]
    #[must_use]
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Mutable metadata attached to every result
    #[inline]
    pub fn context_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.context
    }

    /// Whether mismatches are returned as errors
    #[inline]
    #[must_use]
    pub fn error_on_mismatches(&self) -> bool {
        self.error_on_mismatches
    }

    /// Return a [`MismatchError`] instead of the control value on mismatch
    #[inline]
    pub fn set_error_on_mismatches(&mut self, enabled: bool) -> &mut Self {
        self.error_on_mismatches = enabled;
        self
    }

    /// Register the control behavior
    pub fn control<F>(&mut self, behavior: F) -> &mut Self
    where
        F: Fn(&RunContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.behavior(CONTROL, behavior)
    }

    /// Register the canonical candidate behavior
    pub fn candidate<F>(&mut self, behavior: F) -> &mut Self
    where
        F: Fn(&RunContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.behavior(CANDIDATE, behavior)
    }

    /// Register a named behavior, replacing any previous one of that name
    pub fn behavior<F>(&mut self, name: impl Into<String>, behavior: F) -> &mut Self
    where
        F: Fn(&RunContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.behaviors.insert(name.into(), Arc::new(behavior));
        self
    }

    /// Names of all registered behaviors, in registration order
    pub fn behavior_names(&self) -> impl Iterator<Item = &str> {
        self.behaviors.keys().map(String::as_str)
    }

    /// Replace the comparator
    pub fn compare<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&T, &T) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.comparator = Arc::new(comparator);
        self
    }

    /// Append an ignore predicate
    ///
    /// Predicates see `None` for a side whose behavior errored, so known
    /// candidate failures can be suppressed too.
    pub fn ignore<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(Option<&T>, Option<&T>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.ignores.push(Arc::new(predicate));
        self
    }

    /// Replace the clean hook used by [`Observation::cleaned_value`]
    ///
    /// [`Observation::cleaned_value`]: crate::Observation::cleaned_value
    pub fn clean<F>(&mut self, cleaner: F) -> &mut Self
    where
        F: Fn(&T) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.cleaner = Arc::new(cleaner);
        self
    }

    /// Replace the enablement gate
    pub fn run_if<F>(&mut self, gate: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.run_if = Arc::new(gate);
        self
    }

    /// Replace the pre-run hook
    pub fn before_run<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_run = Arc::new(hook);
        self
    }

    /// Replace the publisher
    pub fn publish<F>(&mut self, publisher: F) -> &mut Self
    where
        F: Fn(&ExperimentResult<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.publisher = Arc::new(publisher);
        self
    }

    /// Replace the error reporter
    pub fn report_errors<F>(&mut self, reporter: F) -> &mut Self
    where
        F: Fn(&[ResultError]) + Send + Sync + 'static,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Run every behavior sequentially and return the control's outcome
    ///
    /// # Workflow
    /// 1. Consult the gate; a gate error is reported and returned
    /// 2. Disabled, or only one behavior: run the control alone
    /// 3. Otherwise run all behaviors, classify, publish, report
    ///
    /// # Errors
    /// - `ExperimentError::RunIf` if the gate failed
    /// - `ExperimentError::Behavior` if the control failed
    /// - `ExperimentError::Mismatch` if a candidate mismatched and
    ///   mismatches raise
    pub fn run(&self, ctx: &RunContext) -> Result<T, ExperimentError> {
        if !self.should_experiment()? {
            return self.run_control(ctx);
        }

        let result = self.execute_sequential(ctx);
        self.finish(result)
    }

    /// Run every behavior concurrently and return the control's outcome
    ///
    /// Behaviors start in a fresh random order and the call waits for all of
    /// them before classifying.
    ///
    /// # Errors
    /// Same as [`Experiment::run`].
    pub async fn run_concurrent(&self, ctx: &RunContext) -> Result<T, ExperimentError> {
        if !self.should_experiment()? {
            return self.run_control(ctx);
        }

        let result = self.execute_concurrent(ctx).await;
        self.finish(result)
    }

    /// Run the control and return its outcome, finishing candidates later
    ///
    /// Candidates run on a detached background task that classifies,
    /// publishes and reports after this call has returned. Mismatches are
    /// therefore never raised here, whatever `error_on_mismatches` says.
    ///
    /// # Errors
    /// - `ExperimentError::RunIf` if the gate failed
    /// - `ExperimentError::Behavior` if the control failed
    pub async fn run_concurrent_candidates(&self, ctx: &RunContext) -> Result<T, ExperimentError> {
        if !self.should_experiment()? {
            return self.run_control(ctx);
        }

        let control = self.execute_detached(ctx);
        control.into_outcome().map_err(ExperimentError::from)
    }

    /// Run every behavior sequentially and return the full result
    ///
    /// The gate is not consulted. The result is still published and any
    /// operational errors reported.
    #[must_use]
    pub fn result(&self, ctx: &RunContext) -> ExperimentResult<T> {
        self.execute_sequential(ctx)
    }

    /// Consult the gate
    ///
    /// A gate error is reported and aborts the run before any behavior
    /// executes.
    fn should_experiment(&self) -> Result<bool, ExperimentError> {
        match (self.run_if)() {
            Ok(enabled) => Ok(enabled && self.behaviors.len() > 1),
            Err(err) => {
                let err = Arc::new(err);
                tracing::warn!(experiment = %self.name, "run_if failed: {err:#}");
                (self.reporter)(&[ResultError::new(
                    Operation::RunIf,
                    self.name.to_string(),
                    Arc::clone(&err),
                )]);
                Err(ExperimentError::RunIf(err))
            }
        }
    }

    /// Run the control alone, skipping the pre-run hook, publishing and reporting
    ///
    /// Panics are still contained by the behavior runner.
    fn run_control(&self, ctx: &RunContext) -> Result<T, ExperimentError> {
        tracing::debug!(experiment = %self.name, "experiment skipped, running control only");
        observe(&self.name, CONTROL, self.behaviors.get(CONTROL), &self.cleaner, ctx)
            .into_outcome()
            .map_err(ExperimentError::from)
    }

    /// Turn a completed result into the caller-facing outcome
    fn finish(&self, result: ExperimentResult<T>) -> Result<T, ExperimentError> {
        if self.error_on_mismatches && !result.control().is_err() && result.is_mismatched() {
            let mismatched = result.mismatched().map(|o| o.name().to_string()).collect();
            return Err(MismatchError::new(self.name.to_string(), mismatched, Arc::new(result)).into());
        }

        result.into_control().into_outcome().map_err(ExperimentError::from)
    }

    /// Classification policy bound to this experiment
    pub(crate) fn classifier(&self) -> Classifier<'_, T> {
        Classifier {
            experiment: &self.name,
            context: &self.context,
            comparator: &self.comparator,
            ignores: &self.ignores,
        }
    }
}

impl<T> std::fmt::Debug for Experiment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("error_on_mismatches", &self.error_on_mismatches)
            .field("behaviors", &self.behaviors.keys().collect::<Vec<_>>())
            .field("ignores", &self.ignores.len())
            .finish_non_exhaustive()
    }
}
