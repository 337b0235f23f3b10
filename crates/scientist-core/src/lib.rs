//! Scientist Core - experiment execution engine
//!
//! Runs candidate implementations beside a trusted control:
//! - Registers named behaviors and policy hooks on an [`Experiment`]
//! - Runs them sequentially, concurrently, or with candidates detached
//! - Contains panics so one behavior cannot take down the caller
//! - Classifies candidates as matched, ignored, or mismatched
//! - Publishes every result and reports hook failures
//!
//! The caller always gets the control's outcome back.
//!
//! # Panics in behaviors
//!
//! A behavior panic is caught and recorded as a behavior error, but the
//! process panic hook still runs first, so the default hook prints a
//! `thread ... panicked at` line to stderr for every contained panic. The
//! engine also emits a `tracing` warning for it. Install a quieter hook with
//! [`std::panic::set_hook`] if that output is unwanted.
//!
//! # Example
//!
//! ```rust,ignore
//! use scientist_core::prelude::*;
//!
//! let mut experiment = Experiment::new("widget-lookup");
//! experiment
//!     .control(|_| Ok(lookup_in_array(42)))
//!     .candidate(|_| Ok(lookup_in_set(42)))
//!     .publish(|result| {
//!         println!("{} mismatched: {}", result.experiment(), result.is_mismatched());
//!         Ok(())
//!     });
//!
//! let found = experiment.run(&RunContext::background())?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod error;
pub mod experiment;
pub mod helpers;
pub mod observation;
pub mod report;
pub mod result;
mod strategy;
pub mod types;

// Re-exports for convenience
pub use error::{
    BehaviorError, ExperimentError, MismatchError, Operation, ResultError, SharedError,
};
pub use experiment::Experiment;
pub use helpers::bool_result;
pub use observation::Observation;
pub use result::{Classification, ExperimentResult};
pub use types::{
    BehaviorFn, CompareFn, ExecutionStrategy, ExperimentConfig, IgnoreFn, RunContext, CANDIDATE,
    CONTROL,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running experiments
    pub use crate::{
        Classification, Experiment, ExperimentConfig, ExperimentError, ExperimentResult,
        Observation, ResultError, RunContext,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn engine_full_flow() {
        let mut e = Experiment::new("flow");
        e.control(|_| Ok(vec![1, 2, 3]))
            .candidate(|_| Ok(vec![1, 2, 3]));

        let result = e.result(&RunContext::background());
        assert!(result.is_matched());
        assert_eq!(e.run(&RunContext::background()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
