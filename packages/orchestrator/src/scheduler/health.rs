//! Read-only operational snapshots of the scheduler.
//!
//! These never fail: a degraded scheduler still reports whatever it can see.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::circuit_breaker::BreakerState;
use super::pool::Worker;

/// Health snapshot of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
    /// Whether the tick loop is running.
    pub running: bool,
    /// Whether this replica currently holds time-based dispatch leadership.
    pub leader: bool,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub draining: bool,
    pub queue_depth: usize,
    /// Cron/interval jobs under management (enabled, not paused/cancelled).
    pub time_based_jobs: usize,
    /// Jobs whose dependencies can no longer be satisfied.
    pub blocked_jobs: usize,
    pub last_eligibility_check: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub circuit_breaker: BreakerState,
}

/// Snapshot of the worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolSnapshot {
    pub size: usize,
    pub draining: bool,
    pub workers: Vec<Worker>,
}

/// Execution counters since startup.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExecutionCounters {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
}

/// Combined metrics: health plus pool plus counters.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub health: SchedulerHealth,
    pub pool: WorkerPoolSnapshot,
    pub executions: ExecutionCounters,
}
