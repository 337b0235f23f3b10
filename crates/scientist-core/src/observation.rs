//! Observations and the behavior runner
//!
//! An [`Observation`] is the outcome of running one named behavior once.
//! [`observe`] is the only place a behavior is invoked: it times the call and
//! contains panics so a misbehaving candidate cannot take down the run.

use crate::error::BehaviorError;
use crate::types::{BehaviorFn, CleanFn, RunContext};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Recorded outcome of one behavior execution
#[derive(Clone)]
pub struct Observation<T> {
    experiment: Arc<str>,
    name: String,
    started: DateTime<Utc>,
    runtime: Duration,
    value: Option<T>,
    error: Option<BehaviorError>,
    cleaner: Option<CleanFn<T>>,
}

impl<T> Observation<T> {
    /// Name of the experiment this observation belongs to
    #[inline]
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Behavior name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wall-clock start time
    #[inline]
    #[must_use]
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Elapsed runtime of the behavior
    #[inline]
    #[must_use]
    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    /// Returned value, absent when the behavior failed
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Behavior error, if any
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&BehaviorError> {
        self.error.as_ref()
    }

    /// Check if the behavior failed
    #[inline]
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Value passed through the experiment's clean hook
    ///
    /// Returns `Ok(None)` when the behavior produced no value.
    ///
    /// # Errors
    /// Whatever the clean hook returns.
    pub fn cleaned_value(&self) -> anyhow::Result<Option<T>>
    where
        T: Clone,
    {
        match (&self.value, &self.cleaner) {
            (Some(value), Some(clean)) => clean(value).map(Some),
            (Some(value), None) => Ok(Some(value.clone())),
            (None, _) => Ok(None),
        }
    }

    /// Observation for a behavior that never produced an outcome
    pub(crate) fn from_error(experiment: &Arc<str>, name: &str, error: BehaviorError) -> Self {
        Self {
            experiment: Arc::clone(experiment),
            name: name.to_string(),
            started: Utc::now(),
            runtime: Duration::ZERO,
            value: None,
            error: Some(error),
            cleaner: None,
        }
    }

    /// Split into the caller-facing outcome
    pub(crate) fn into_outcome(self) -> Result<T, BehaviorError> {
        match (self.value, self.error) {
            (_, Some(err)) => Err(err),
            (Some(value), None) => Ok(value),
            (None, None) => Err(BehaviorError::NotFound {
                behavior: self.name,
            }),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("experiment", &self.experiment)
            .field("name", &self.name)
            .field("started", &self.started)
            .field("runtime", &self.runtime)
            .field("value", &self.value)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Run one behavior and record what happened
///
/// A missing behavior yields a not-found error without executing anything.
/// Panics raised by the behavior are caught and become
/// [`BehaviorError::Panicked`].
pub(crate) fn observe<T>(
    experiment: &Arc<str>,
    name: &str,
    behavior: Option<&BehaviorFn<T>>,
    cleaner: &CleanFn<T>,
    ctx: &RunContext,
) -> Observation<T> {
    let started = Utc::now();
    let start = Instant::now();

    let outcome = match behavior {
        Some(behavior) => {
            match panic::catch_unwind(AssertUnwindSafe(|| behavior(ctx))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(BehaviorError::failed(err)),
                Err(payload) => {
                    let payload = panic_message(payload.as_ref());
                    tracing::warn!(
                        experiment = %experiment,
                        behavior = name,
                        "behavior panicked: {payload}"
                    );
                    Err(BehaviorError::Panicked {
                        behavior: name.to_string(),
                        payload,
                    })
                }
            }
        }
        None => Err(BehaviorError::NotFound {
            behavior: name.to_string(),
        }),
    };

    let runtime = start.elapsed();
    tracing::debug!(
        experiment = %experiment,
        behavior = name,
        runtime_us = runtime.as_micros() as u64,
        ok = outcome.is_ok(),
        "observed behavior"
    );

    let (value, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err)),
    };

    Observation {
        experiment: Arc::clone(experiment),
        name: name.to_string(),
        started,
        runtime,
        value,
        error,
        cleaner: Some(Arc::clone(cleaner)),
    }
}

/// Render a panic payload as text
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<anyhow::Error>() {
        err.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn behavior_fn<T, F>(f: F) -> BehaviorFn<T>
    where
        F: Fn(&RunContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn cleaner<T, F>(f: F) -> CleanFn<T>
    where
        F: Fn(&T) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn identity<T: Clone + Send + Sync + 'static>() -> CleanFn<T> {
        cleaner(|v: &T| Ok(v.clone()))
    }

    fn experiment() -> Arc<str> {
        Arc::from("observe")
    }

    #[test]
    fn observe_records_value() {
        let behavior: BehaviorFn<i32> = behavior_fn(|_| Ok(7));
        let obs = observe(
            &experiment(),
            "control",
            Some(&behavior),
            &identity(),
            &RunContext::background(),
        );

        assert_eq!(obs.name(), "control");
        assert_eq!(obs.experiment(), "observe");
        assert_eq!(obs.value(), Some(&7));
        assert!(!obs.is_err());
    }

    #[test]
    fn observe_records_returned_error() {
        let behavior: BehaviorFn<i32> = behavior_fn(|_| Err(anyhow::anyhow!("nope")));
        let obs = observe(
            &experiment(),
            "candidate",
            Some(&behavior),
            &identity(),
            &RunContext::background(),
        );

        assert!(obs.value().is_none());
        assert_eq!(obs.error().map(BehaviorError::message).as_deref(), Some("nope"));
    }

    #[test]
    fn observe_contains_str_panic() {
        let behavior: BehaviorFn<i32> = behavior_fn(|_| panic!("candidate"));
        let obs = observe(
            &experiment(),
            "candidate",
            Some(&behavior),
            &identity(),
            &RunContext::background(),
        );

        assert!(obs.value().is_none());
        let err = obs.error().unwrap();
        assert_eq!(err.to_string(), "candidate");
        assert!(matches!(err, BehaviorError::Panicked { behavior, .. } if behavior == "candidate"));
    }

    #[test]
    fn observe_contains_formatted_panic() {
        let behavior: BehaviorFn<i32> = behavior_fn(|_| panic!("bad value {}", 42));
        let obs = observe(
            &experiment(),
            "three",
            Some(&behavior),
            &identity(),
            &RunContext::background(),
        );

        assert_eq!(obs.error().unwrap().to_string(), "bad value 42");
    }

    #[test]
    fn observe_contains_opaque_panic() {
        let behavior: BehaviorFn<i32> = behavior_fn(|_| std::panic::panic_any(17_u8));
        let obs = observe(
            &experiment(),
            "three",
            Some(&behavior),
            &identity(),
            &RunContext::background(),
        );

        assert_eq!(obs.error().unwrap().to_string(), "Box<dyn Any>");
    }

    #[test]
    fn observe_missing_behavior() {
        let obs = observe::<i32>(
            &experiment(),
            "ghost",
            None,
            &identity(),
            &RunContext::background(),
        );

        assert!(matches!(obs.error(), Some(BehaviorError::NotFound { behavior }) if behavior == "ghost"));
    }

    #[test]
    fn cleaned_value_uses_hook() {
        let behavior: BehaviorFn<String> = behavior_fn(|_| Ok("booya".to_string()));
        let upper: CleanFn<String> = cleaner(|v: &String| Ok(v.to_uppercase()));
        let obs = observe(
            &experiment(),
            "control",
            Some(&behavior),
            &upper,
            &RunContext::background(),
        );

        assert_eq!(obs.cleaned_value().unwrap().as_deref(), Some("BOOYA"));
        assert_eq!(obs.value().map(String::as_str), Some("booya"));
    }

    #[test]
    fn cleaned_value_absent_on_error() {
        let behavior: BehaviorFn<String> = behavior_fn(|_| Err(anyhow::anyhow!("x")));
        let obs = observe(
            &experiment(),
            "control",
            Some(&behavior),
            &identity(),
            &RunContext::background(),
        );

        assert!(obs.cleaned_value().unwrap().is_none());
    }
}
