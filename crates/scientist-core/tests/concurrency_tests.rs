//! Concurrent strategy tests

use pretty_assertions::assert_eq;
use scientist_core::prelude::*;
use scientist_core::{BehaviorError, ExecutionStrategy};
use scientist_test_utils::{basic_experiment, channel_publisher, init_tracing, RecordingReporter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_returns_control_value() {
    init_tracing();
    let mut experiment = basic_experiment();
    let mut published = channel_publisher(&mut experiment);

    assert_eq!(experiment.run_concurrent(&RunContext::background()).await.unwrap(), 1);

    let summary = published.try_recv().unwrap();
    assert_eq!(summary.candidates, ["candidate", "correct", "three"]);
    assert_eq!(summary.mismatched, ["candidate", "three"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_behaviors_overlap() {
    // Every behavior waits for all others, so this only finishes if they run together
    let barrier = Arc::new(Barrier::new(3));
    let mut experiment: Experiment<usize> = Experiment::new("overlap");
    for name in ["control", "candidate", "other"] {
        let barrier = Arc::clone(&barrier);
        experiment.behavior(name, move |_| {
            barrier.wait();
            Ok(3)
        });
    }

    let outcome = timeout(
        Duration::from_secs(10),
        experiment.run_concurrent(&RunContext::background()),
    )
    .await
    .expect("behaviors did not run concurrently");
    assert_eq!(outcome.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_raises_mismatch() {
    let mut experiment = basic_experiment();
    experiment.set_error_on_mismatches(true);

    let err = experiment
        .run_concurrent(&RunContext::background())
        .await
        .unwrap_err();
    assert!(err.is_mismatch());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_contains_panics() {
    let reporter = RecordingReporter::new();
    let mut experiment: Experiment<i32> = Experiment::new("panicky");
    experiment
        .control(|_| Ok(1))
        .candidate(|_| panic!("candidate"));
    reporter.attach(&mut experiment);
    let mut published = channel_publisher(&mut experiment);

    assert_eq!(experiment.run_concurrent(&RunContext::background()).await.unwrap(), 1);
    assert_eq!(published.try_recv().unwrap().mismatched, ["candidate"]);
    assert_eq!(reporter.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_candidates_publishes_later() {
    let mut experiment = basic_experiment();
    experiment.set_error_on_mismatches(true);
    let mut published = channel_publisher(&mut experiment);

    let value = experiment
        .run_concurrent_candidates(&RunContext::background())
        .await
        .unwrap();
    assert_eq!(value, 1);

    let summary = timeout(Duration::from_secs(10), published.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.control, "control");
    assert_eq!(summary.candidates, ["candidate", "correct", "three"]);
    assert_eq!(summary.mismatched, ["candidate", "three"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_candidates_returns_before_candidates_finish() {
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Arc::new(std::sync::Mutex::new(release_rx));

    let mut experiment: Experiment<i32> = Experiment::new("slow-candidate");
    experiment.control(|_| Ok(1)).candidate(move |_| {
        let _ = release_rx.lock().map(|rx| rx.recv());
        Ok(1)
    });
    let mut published = channel_publisher(&mut experiment);

    let value = experiment
        .run_concurrent_candidates(&RunContext::background())
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert!(published.try_recv().is_err());

    release_tx.send(()).unwrap();
    let summary = timeout(Duration::from_secs(10), published.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(summary.mismatched.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_concurrent_candidates_control_error() {
    let mut experiment: Experiment<i32> = Experiment::new("broken-control");
    experiment
        .control(|_| Err(anyhow::anyhow!("control broke")))
        .candidate(|_| Ok(1));

    let err = experiment
        .run_concurrent_candidates(&RunContext::background())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "control broke");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_strategies_honor_gate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let mut experiment: Experiment<i32> = Experiment::new("gated");
    experiment
        .control(|_| Ok(1))
        .candidate(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        })
        .run_if(|| Ok(false));

    let ctx = RunContext::background();
    assert_eq!(experiment.run_concurrent(&ctx).await.unwrap(), 1);
    assert_eq!(experiment.run_concurrent_candidates(&ctx).await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_control_panic_contained_when_gated_off() {
    let mut experiment: Experiment<i32> = Experiment::new("gated-panic");
    experiment
        .control(|_| panic!("control"))
        .candidate(|_| Ok(1))
        .run_if(|| Ok(false));

    let ctx = RunContext::background();
    let err = experiment.run_concurrent(&ctx).await.unwrap_err();
    assert!(matches!(err, ExperimentError::Behavior(BehaviorError::Panicked { .. })));

    let err = experiment.run_concurrent_candidates(&ctx).await.unwrap_err();
    assert!(matches!(err, ExperimentError::Behavior(BehaviorError::Panicked { .. })));
    assert_eq!(err.to_string(), "control");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_control_panic_contained_with_single_behavior() {
    let mut experiment: Experiment<i32> = Experiment::new("solo-panic");
    experiment.control(|_| panic!("control"));

    let ctx = RunContext::background();
    let err = experiment.run_concurrent(&ctx).await.unwrap_err();
    assert!(matches!(err.as_behavior(), Some(BehaviorError::Panicked { .. })));

    let err = experiment.run_concurrent_candidates(&ctx).await.unwrap_err();
    assert!(matches!(err.as_behavior(), Some(BehaviorError::Panicked { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_result_strategy_is_recorded() {
    let mut experiment = basic_experiment();
    let strategies = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&strategies);
    experiment.publish(move |result| {
        sink.lock().push(result.strategy());
        Ok(())
    });

    let ctx = RunContext::background();
    let _ = experiment.run(&ctx);
    let _ = experiment.run_concurrent(&ctx).await;

    assert_eq!(
        *strategies.lock(),
        [ExecutionStrategy::Sequential, ExecutionStrategy::Concurrent]
    );
}
