//! Integration tests for the dispatch lifecycle:
//! - drain leaves zero active workers and blocks admission until resume
//! - the circuit breaker walks closed → open → half-open → closed
//! - time-based jobs dispatch on the eligibility pass and respect pause
//! - dependent jobs become eligible only after their dependency completes

mod common;

use std::time::Duration;

use common::{event_job, interval_job, wait_until, Harness};
use orchestrator_core::error::{DenialReason, OrchestratorError};
use orchestrator_core::jobs::{ExecutionStatus, IntervalUnit, JobRepository, JobStatus};
use orchestrator_core::scheduler::{AdmissionOutcome, BreakerState};
use uuid::Uuid;

#[tokio::test]
async fn drain_waits_for_active_executions_and_blocks_admission() {
    let h = Harness::new();
    let gate = h.executor.hold_executions();

    let first = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    let second = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    h.scheduler.force_run(first.id).await.unwrap();
    h.scheduler.force_run(second.id).await.unwrap();
    assert_eq!(h.scheduler.health().await.active_workers, 2);

    let scheduler = h.scheduler.clone();
    let drain = tokio::spawn(async move { scheduler.drain_workers().await });
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !h.scheduler.health().await.draining {
        assert!(tokio::time::Instant::now() < deadline, "drain never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // No new admission between drain start and resume.
    let third = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    assert!(matches!(
        h.scheduler.force_run(third.id).await,
        Err(OrchestratorError::Unavailable(_))
    ));

    gate.release();
    drain.await.unwrap().unwrap();

    let health = h.scheduler.health().await;
    assert_eq!(health.active_workers, 0);
    assert!(health.draining);

    h.scheduler.resume_workers().await.unwrap();
    assert!(matches!(
        h.scheduler.force_run(third.id).await.unwrap(),
        AdmissionOutcome::Started(_)
    ));
}

#[tokio::test]
async fn breaker_walks_closed_open_half_open_closed() {
    let h = Harness::new();
    h.executor.set_should_fail(true);

    for _ in 0..3 {
        let job = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
        h.scheduler.force_run(job.id).await.unwrap();
        assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
    }
    assert_eq!(
        h.scheduler.health().await.circuit_breaker,
        BreakerState::Open
    );

    // While open, force-run on any job is denied.
    let denied = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    assert!(matches!(
        h.scheduler.force_run(denied.id).await,
        Err(OrchestratorError::AdmissionDenied(DenialReason::CircuitOpen))
    ));

    // After the cool-down exactly one trial is allowed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.scheduler.health().await.circuit_breaker,
        BreakerState::HalfOpen
    );
    h.executor.set_should_fail(false);

    let gate = h.executor.hold_executions();
    let trial = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    h.scheduler.force_run(trial.id).await.unwrap();
    let extra = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    assert!(matches!(
        h.scheduler.force_run(extra.id).await,
        Err(OrchestratorError::AdmissionDenied(DenialReason::CircuitOpen))
    ));

    gate.release();
    assert!(h.scheduler.wait_idle(trial.id, Duration::from_secs(1)).await);
    assert_eq!(
        h.scheduler.health().await.circuit_breaker,
        BreakerState::Closed
    );
}

#[tokio::test]
async fn interval_job_dispatches_once_due_and_pause_suspends_it() {
    let h = Harness::new();
    let mut job = interval_job(Uuid::new_v4(), 1, IntervalUnit::Seconds);
    // Make it immediately due by backdating its creation.
    job.created_at = chrono::Utc::now() - chrono::Duration::seconds(5);
    let job = h.repo.create(job).await.unwrap();

    h.scheduler.eligibility_pass().await;
    assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
    assert_eq!(h.executor.invocation_count(), 1);
    assert!(h.repo.get(job.id).await.unwrap().last_run_at.is_some());

    // Not yet due again: the interval restarts from last_run_at.
    h.scheduler.eligibility_pass().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.executor.invocation_count(), 1);

    h.scheduler.pause_job(job.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.scheduler.eligibility_pass().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.executor.invocation_count(), 1);

    let resumed = h.scheduler.resume_job(job.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Scheduled);
    h.scheduler.eligibility_pass().await;
    assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
    let executor = h.executor.clone();
    wait_until(move || executor.invocation_count() == 2).await;
}

#[tokio::test]
async fn dependent_job_runs_only_after_dependency_completes() {
    let h = Harness::new();
    let gate = h.executor.hold_executions();
    let source = Uuid::new_v4();

    let upstream = h.repo.create(event_job(source)).await.unwrap();
    let mut downstream = event_job(source);
    downstream.depends_on = vec![upstream.id];
    let downstream = h.repo.create(downstream).await.unwrap();

    assert!(matches!(
        h.scheduler.force_run(downstream.id).await,
        Err(OrchestratorError::AdmissionDenied(DenialReason::DependenciesUnmet))
    ));

    // A still-running dependency does not satisfy the gate either.
    h.scheduler.force_run(upstream.id).await.unwrap();
    assert!(matches!(
        h.scheduler.force_run(downstream.id).await,
        Err(OrchestratorError::AdmissionDenied(DenialReason::DependenciesUnmet))
    ));

    gate.release();
    assert!(h
        .scheduler
        .wait_idle(upstream.id, Duration::from_secs(1))
        .await);
    let latest = h.repo.latest_execution(upstream.id).await.unwrap().unwrap();
    assert_eq!(latest.status, ExecutionStatus::Completed);

    assert!(matches!(
        h.scheduler.force_run(downstream.id).await.unwrap(),
        AdmissionOutcome::Started(_)
    ));
}

#[tokio::test]
async fn executions_of_one_job_are_strictly_numbered() {
    let h = Harness::new();
    let job = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();

    for expected in 1..=3u32 {
        h.scheduler.force_run(job.id).await.unwrap();
        assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
        let latest = h.repo.latest_execution(job.id).await.unwrap().unwrap();
        assert_eq!(latest.execution_number, expected);
    }

    let history = h.repo.executions(job.id).await.unwrap();
    let numbers: Vec<u32> = history.iter().map(|e| e.execution_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn retry_attempt_increments_after_failures() {
    let h = Harness::new();
    let job = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();

    h.executor.set_should_fail(true);
    h.scheduler.force_run(job.id).await.unwrap();
    assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
    assert_eq!(
        h.repo.latest_execution(job.id).await.unwrap().unwrap().retry_attempt,
        0
    );

    h.executor.set_should_fail(false);
    h.scheduler.force_run(job.id).await.unwrap();
    assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
    let latest = h.repo.latest_execution(job.id).await.unwrap().unwrap();
    assert_eq!(latest.retry_attempt, 1);
    assert_eq!(latest.status, ExecutionStatus::Completed);
}
