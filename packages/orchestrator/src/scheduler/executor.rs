//! Execution seam between the scheduler and the crawl engine.
//!
//! The scheduler owns admission, timeouts, and bookkeeping; the actual
//! fetching/extraction lives behind [`JobExecutor`]. Cancellation is
//! cooperative: implementations should observe the token at their own
//! checkpoints.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::{ExecutionReport, Job};

/// Handle controlling executions held by [`MockExecutor::hold_executions`].
/// Dropping the gate also releases them.
pub struct ExecutionGate(watch::Sender<bool>);

impl ExecutionGate {
    /// Open the gate. Held and future executions proceed.
    pub fn release(&self) {
        let _ = self.0.send(true);
    }
}

/// Runs one crawl execution for a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute the job's crawl. Returning `Err` marks the execution failed;
    /// the error message is recorded on the execution record.
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Result<ExecutionReport>;
}

/// Test executor that records invocations and can be told to fail, sleep,
/// or hold until released.
#[derive(Default)]
pub struct MockExecutor {
    invocations: RwLock<Vec<Uuid>>,
    should_fail: RwLock<bool>,
    delay: RwLock<Duration>,
    hold: RwLock<Option<watch::Receiver<bool>>>,
    report: RwLock<ExecutionReport>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent executions fail.
    pub fn set_should_fail(&self, should_fail: bool) {
        *self.should_fail.write().unwrap_or_else(|e| e.into_inner()) = should_fail;
    }

    /// Sleep for `delay` before completing.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Block executions until the returned gate is released. The gate is
    /// one-way: after release, later executions pass straight through.
    pub fn hold_executions(&self) -> ExecutionGate {
        let (tx, rx) = watch::channel(false);
        *self.hold.write().unwrap_or_else(|e| e.into_inner()) = Some(rx);
        ExecutionGate(tx)
    }

    /// Set the report returned by successful executions.
    pub fn set_report(&self, report: ExecutionReport) {
        *self.report.write().unwrap_or_else(|e| e.into_inner()) = report;
    }

    pub fn invocations(&self) -> Vec<Uuid> {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn was_invoked_for(&self, job_id: Uuid) -> bool {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&job_id)
    }
}

#[async_trait]
impl JobExecutor for MockExecutor {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Result<ExecutionReport> {
        self.invocations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.id);

        let delay = *self.delay.read().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("execution cancelled"),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let hold = self.hold.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(mut gate) = hold {
            while !*gate.borrow() {
                tokio::select! {
                    _ = cancel.cancelled() => anyhow::bail!("execution cancelled"),
                    changed = gate.changed() => {
                        // A dropped gate counts as released.
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        if *self.should_fail.read().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("mock executor failure");
        }
        Ok(*self.report.read().unwrap_or_else(|e| e.into_inner()))
    }
}
