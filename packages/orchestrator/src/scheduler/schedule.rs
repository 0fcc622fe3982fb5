//! Pluggable scheduling strategies: next-run computation and leader election.
//!
//! The scheduler's admission logic never parses cron expressions or talks to
//! an election backend itself; it asks these narrow interfaces. Swapping the
//! cron parser or the election protocol does not touch dispatch code.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::jobs::{normalize_cron_expression, ScheduleSpec};

/// Computes the next eligible instant for a schedule.
pub trait ScheduleEvaluator: Send + Sync {
    /// Next instant strictly after `after` at which the schedule fires.
    /// `None` for schedules that are not time-driven.
    fn next_run(&self, spec: &ScheduleSpec, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Default evaluator: `cron` crate for cron expressions, plain arithmetic
/// for intervals. Five-field Unix expressions are normalized to the seven
/// fields the parser expects.
#[derive(Debug, Default)]
pub struct CronEvaluator;

impl ScheduleEvaluator for CronEvaluator {
    fn next_run(&self, spec: &ScheduleSpec, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match spec {
            ScheduleSpec::Cron { expression } => {
                let normalized = normalize_cron_expression(expression);
                // Expressions are validated at job creation; an unparsable one
                // here means the job predates validation, so it never fires.
                let schedule = cron::Schedule::from_str(&normalized).ok()?;
                schedule.after(&after).next()
            }
            ScheduleSpec::Interval { every, unit } => {
                let every = (*every).min(u32::MAX as u64) as u32;
                let step = unit.as_duration().saturating_mul(every);
                let step = chrono::Duration::from_std(step).ok()?;
                Some(after + step)
            }
            ScheduleSpec::Immediate | ScheduleSpec::Event => None,
        }
    }
}

/// Answers "is this replica the leader right now".
///
/// Only the leader performs time-based dispatch; force-run and trigger
/// admissions are accepted on every replica. The election mechanism itself
/// lives outside the core.
pub trait LeaderElector: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Single-replica deployment: always the leader.
#[derive(Debug, Default)]
pub struct SingleNodeElector;

impl LeaderElector for SingleNodeElector {
    fn is_leader(&self) -> bool {
        true
    }
}
