//! Execution strategies
//!
//! Three ways to produce the observations of one run, all converging on the
//! same classify/publish/report tail:
//! - **Sequential**: control first, then candidates in registration order
//! - **Concurrent**: one blocking task per behavior, started in shuffled
//!   order, joined before classification
//! - **Concurrent candidates**: control inline, candidates detached onto a
//!   background task that owns a snapshot of the experiment

use crate::error::{BehaviorError, Operation, ResultError};
use crate::experiment::Experiment;
use crate::observation::{observe, Observation};
use crate::result::ExperimentResult;
use crate::types::{ExecutionStrategy, RunContext, CONTROL};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

impl<T> Experiment<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run control then candidates on the calling thread
    pub(crate) fn execute_sequential(&self, ctx: &RunContext) -> ExperimentResult<T> {
        let span = self.span(ExecutionStrategy::Sequential);
        let _enter = span.enter();

        let errors = self.prepare();
        let control = self.observe(CONTROL, ctx);
        let candidates = self
            .candidate_names()
            .map(|name| self.observe(name, ctx))
            .collect();

        self.conclude(ExecutionStrategy::Sequential, control, candidates, errors)
    }

    /// Run every behavior on its own task and wait for all of them
    pub(crate) async fn execute_concurrent(&self, ctx: &RunContext) -> ExperimentResult<T> {
        let span = self.span(ExecutionStrategy::Concurrent);
        async {
            let errors = self.prepare();

            let mut names: Vec<String> = self.candidate_names().map(str::to_string).collect();
            names.push(CONTROL.to_string());
            let mut observations = self.fan_out(names, ctx).await;

            let control = observations
                .remove(CONTROL)
                .unwrap_or_else(|| self.lost(CONTROL));
            let candidates = self.collect_candidates(observations);

            self.conclude(ExecutionStrategy::Concurrent, control, candidates, errors)
        }
        .instrument(span)
        .await
    }

    /// Run the control inline and hand candidates to a detached task
    ///
    /// The background task works on a clone of this experiment and of the
    /// control observation, so it outlives the caller's borrow.
    pub(crate) fn execute_detached(&self, ctx: &RunContext) -> Observation<T> {
        let span = self.span(ExecutionStrategy::ConcurrentCandidates);

        let (errors, control) = span.in_scope(|| (self.prepare(), self.observe(CONTROL, ctx)));

        let snapshot = self.clone();
        let background_control = control.clone();
        let ctx = ctx.clone();
        tokio::spawn(
            async move {
                let names = snapshot.candidate_names().map(str::to_string).collect();
                let observations = snapshot.fan_out(names, &ctx).await;
                let candidates = snapshot.collect_candidates(observations);
                snapshot.conclude(
                    ExecutionStrategy::ConcurrentCandidates,
                    background_control,
                    candidates,
                    errors,
                );
            }
            .instrument(span),
        );

        control
    }

    /// Invoke the pre-run hook when more than one behavior will execute
    fn prepare(&self) -> Vec<ResultError> {
        if self.behaviors.len() < 2 {
            return Vec::new();
        }

        match (self.before_run)() {
            Ok(()) => Vec::new(),
            Err(err) => {
                tracing::warn!(experiment = %self.name, "before_run failed: {err:#}");
                vec![ResultError::new(Operation::BeforeRun, self.name.to_string(), err)]
            }
        }
    }

    /// Classify, publish, then report operational errors
    fn conclude(
        &self,
        strategy: ExecutionStrategy,
        control: Observation<T>,
        candidates: Vec<Observation<T>>,
        errors: Vec<ResultError>,
    ) -> ExperimentResult<T> {
        let mut result = self
            .classifier()
            .assemble(strategy, control, candidates, errors);

        if let Err(err) = (self.publisher)(&result) {
            tracing::warn!(experiment = %self.name, "publish failed: {err:#}");
            result.push_error(ResultError::new(
                Operation::Publish,
                self.name.to_string(),
                err,
            ));
        }

        if !result.errors().is_empty() {
            (self.reporter)(result.errors());
        }

        result
    }

    /// Start one blocking task per name in shuffled order and join them all
    ///
    /// Observations arrive in completion order and are bucketed by name.
    async fn fan_out(&self, names: Vec<String>, ctx: &RunContext) -> HashMap<String, Observation<T>> {
        let names = shuffled(names);
        // Capacity matches the task count, so producers never wait.
        let (tx, mut rx) = mpsc::channel(names.len().max(1));
        let mut tasks = JoinSet::new();

        for name in names {
            let tx = tx.clone();
            let experiment = Arc::clone(&self.name);
            let behavior = self.behaviors.get(&name).cloned();
            let cleaner = Arc::clone(&self.cleaner);
            let ctx = ctx.clone();

            tasks.spawn_blocking(move || {
                let observation = observe(&experiment, &name, behavior.as_ref(), &cleaner, &ctx);
                if tx.blocking_send(observation).is_err() {
                    tracing::error!(experiment = %experiment, behavior = %name, "observation dropped");
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(experiment = %self.name, "behavior task did not complete: {err}");
            }
        }

        let mut observations = HashMap::new();
        while let Some(observation) = rx.recv().await {
            observations.insert(observation.name().to_string(), observation);
        }
        observations
    }

    /// Candidate observations in registration order
    fn collect_candidates(
        &self,
        mut observations: HashMap<String, Observation<T>>,
    ) -> Vec<Observation<T>> {
        self.candidate_names()
            .map(|name| {
                observations
                    .remove(name)
                    .unwrap_or_else(|| self.lost(name))
            })
            .collect()
    }

    fn candidate_names(&self) -> impl Iterator<Item = &str> {
        self.behaviors
            .keys()
            .map(String::as_str)
            .filter(|name| *name != CONTROL)
    }

    fn observe(&self, name: &str, ctx: &RunContext) -> Observation<T> {
        observe(
            &self.name,
            name,
            self.behaviors.get(name),
            &self.cleaner,
            ctx,
        )
    }

    /// Observation for a task that never reported back
    fn lost(&self, name: &str) -> Observation<T> {
        Observation::from_error(
            &self.name,
            name,
            BehaviorError::Lost {
                behavior: name.to_string(),
            },
        )
    }

    fn span(&self, strategy: ExecutionStrategy) -> tracing::Span {
        tracing::info_span!(
            "experiment",
            experiment = %self.name,
            strategy = strategy.as_str(),
            behaviors = self.behaviors.len(),
        )
    }
}

/// Fisher-Yates shuffle seeded from the clock
///
/// Only meant to keep start order from biasing observations.
pub(crate) fn shuffled(mut names: Vec<String>) -> Vec<String> {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed);
    names.shuffle(&mut rng);
    names
}
