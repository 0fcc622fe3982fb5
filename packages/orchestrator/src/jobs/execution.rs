//! Append-only execution history for jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one execution. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Outcome counters reported by the crawl engine for one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub pages_crawled: u64,
    pub items_extracted: u64,
}

/// One run of a job. Records are append-only: a retry or force-run creates a
/// new execution with an incremented `execution_number`, never overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Monotonically increasing per job, starting at 1.
    pub execution_number: u32,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived, fixed at completion.
    pub duration_ms: Option<u64>,
    pub pages_crawled: u64,
    pub items_extracted: u64,
    /// Error message/stack when the execution failed.
    pub error: Option<String>,
    /// 0 = first try.
    pub retry_attempt: u32,
}

impl JobExecution {
    /// Start a new execution record.
    pub fn start(job_id: Uuid, execution_number: u32, retry_attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            execution_number,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            pages_crawled: 0,
            items_extracted: 0,
            error: None,
            retry_attempt,
        }
    }

    /// Finalize with an outcome. Duration is fixed here.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        report: ExecutionReport,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some(
            (now - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.pages_crawled = report.pages_crawled;
        self.items_extracted = report.items_extracted;
        self.error = error;
    }
}
