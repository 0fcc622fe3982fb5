//! Job model for schedulable crawl work.
//!
//! A [`Job`] ties a crawl target to an activation policy: how the scheduler
//! decides when the job runs. Exactly one [`ScheduleSpec`] variant governs
//! that policy; validation keeps variant-specific fields from bleeding into
//! each other.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Lifecycle status of a job.
///
/// `Completed`/`Failed`/`Cancelled` reflect the most recent execution's
/// outcome; `Scheduled`/`Paused` reflect pending autonomous dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Scheduled | Running | Paused | Cancelled),
            Scheduled => matches!(next, Pending | Running | Paused | Cancelled),
            Running => matches!(next, Completed | Failed | Cancelled),
            Paused => matches!(next, Pending | Scheduled | Cancelled),
            // Terminal for an execution, not for the job: recurring jobs and
            // retries start a fresh execution from these states.
            Completed => matches!(next, Pending | Scheduled | Running | Cancelled),
            Failed => matches!(next, Pending | Scheduled | Running | Cancelled),
            Cancelled => matches!(next, Pending | Running),
        }
    }

    /// Whether admission may start a new execution from this status.
    pub fn is_admissible(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Completed | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Units for interval schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// Length of one unit.
    pub fn as_duration(self) -> Duration {
        match self {
            IntervalUnit::Seconds => Duration::from_secs(1),
            IntervalUnit::Minutes => Duration::from_secs(60),
            IntervalUnit::Hours => Duration::from_secs(3600),
            IntervalUnit::Days => Duration::from_secs(86_400),
        }
    }
}

/// Activation policy for a job. Exactly one variant applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Eligible once, on creation or explicit force-run.
    Immediate,
    /// Eligible when the cron expression's next instant has passed.
    Cron { expression: String },
    /// Eligible when `every * unit` has elapsed since the last run.
    Interval { every: u64, unit: IntervalUnit },
    /// Never autonomously eligible; admitted only via triggers or force-run.
    Event,
}

impl ScheduleSpec {
    /// Short name for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleSpec::Immediate => "immediate",
            ScheduleSpec::Cron { .. } => "cron",
            ScheduleSpec::Interval { .. } => "interval",
            ScheduleSpec::Event => "event",
        }
    }

    /// Whether this schedule is driven by the passage of time.
    pub fn is_time_based(&self) -> bool {
        matches!(self, ScheduleSpec::Cron { .. } | ScheduleSpec::Interval { .. })
    }
}

/// A schedulable unit of crawl work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Immutable identity, assigned at creation.
    pub id: Uuid,
    /// The external source configuration this job crawls for.
    pub source_id: Uuid,
    /// Crawl target.
    pub url: String,
    /// Activation policy.
    pub schedule: ScheduleSpec,
    /// Gates autonomous (time-based) dispatch independently of status.
    pub schedule_enabled: bool,
    /// Higher dispatches first.
    pub priority: i32,
    /// Executions are forcibly terminated past this bound.
    pub timeout: Duration,
    /// Jobs whose latest execution must be completed before this one runs.
    pub depends_on: Vec<Uuid>,
    /// Webhook pattern consumed by the trigger router, if registered.
    pub webhook_pattern: Option<String>,
    /// Pub/sub channel consumed by the trigger router, if registered.
    pub channel: Option<String>,
    pub status: JobStatus,
    /// Start time of the most recent execution, if any.
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with defaults: enabled, priority 0, 5 minute timeout.
    pub fn new(source_id: Uuid, url: impl Into<String>, schedule: ScheduleSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id,
            url: url.into(),
            schedule,
            schedule_enabled: true,
            priority: 0,
            timeout: Duration::from_secs(300),
            depends_on: Vec::new(),
            webhook_pattern: None,
            channel: None,
            status: JobStatus::Pending,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate field-level rules. Dependency existence and cycles are
    /// checked by the repository, which can see the whole graph.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(OrchestratorError::Validation("url must not be empty".into()));
        }
        if self.priority < 0 {
            return Err(OrchestratorError::Validation(
                "priority must be non-negative".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(OrchestratorError::Validation(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.depends_on.contains(&self.id) {
            return Err(OrchestratorError::Validation(
                "job cannot depend on itself".into(),
            ));
        }
        match &self.schedule {
            ScheduleSpec::Cron { expression } => {
                validate_cron_expression(expression)?;
            }
            ScheduleSpec::Interval { every, .. } => {
                if *every == 0 {
                    return Err(OrchestratorError::Validation(
                        "interval length must be greater than zero".into(),
                    ));
                }
            }
            ScheduleSpec::Immediate | ScheduleSpec::Event => {}
        }
        Ok(())
    }
}

/// Convert a standard 5-field Unix cron expression to the 7-field format
/// expected by the `cron` crate (seconds prepended, year appended).
pub(crate) fn normalize_cron_expression(expression: &str) -> String {
    let field_count = expression.split_whitespace().count();
    if field_count == 5 {
        format!("0 {} *", expression)
    } else {
        expression.to_string()
    }
}

/// Validate a cron expression.
pub fn validate_cron_expression(expression: &str) -> Result<()> {
    let normalized = normalize_cron_expression(expression);
    cron::Schedule::from_str(&normalized)
        .map(|_| ())
        .map_err(|e| OrchestratorError::Validation(format!("invalid cron expression: {e}")))
}

/// Check that `job`'s dependencies exist and introduce no cycle.
///
/// `graph` maps every known job ID to its `depends_on` list; the candidate
/// job's own entry is taken from `job`, so updates are checked against the
/// state they would create.
pub fn validate_dependencies(job: &Job, graph: &HashMap<Uuid, Vec<Uuid>>) -> Result<()> {
    for dep in &job.depends_on {
        if !graph.contains_key(dep) {
            return Err(OrchestratorError::Validation(format!(
                "depends_on references unknown job {dep}"
            )));
        }
    }

    // DFS from the candidate; revisiting it means a cycle through its edges.
    let mut visited = HashSet::new();
    let mut stack: Vec<Uuid> = job.depends_on.clone();
    while let Some(current) = stack.pop() {
        if current == job.id {
            return Err(OrchestratorError::Validation(
                "depends_on graph contains a cycle".into(),
            ));
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = graph.get(&current) {
            stack.extend(next.iter().copied());
        }
    }
    Ok(())
}
