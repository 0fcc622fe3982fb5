//! Job domain model: the schedulable unit of crawl work, its execution
//! history, and the repository boundary behind which persistence lives.

mod execution;
mod job;
mod repository;

pub use execution::{ExecutionReport, ExecutionStatus, JobExecution};
pub use job::{
    validate_cron_expression, validate_dependencies, IntervalUnit, Job, JobStatus, ScheduleSpec,
};
pub use repository::{InMemoryJobRepository, JobFilter, JobRepository};

pub(crate) use job::normalize_cron_expression;
