//! Job dispatch: the bounded worker pool, the priority queue, the circuit
//! breaker, and the scheduler that serializes admission across them.

mod circuit_breaker;
mod executor;
mod health;
mod pool;
mod queue;
mod schedule;
#[allow(clippy::module_inception)]
mod scheduler;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use executor::{ExecutionGate, JobExecutor, MockExecutor};
pub use health::{ExecutionCounters, SchedulerHealth, SchedulerMetrics, WorkerPoolSnapshot};
pub use pool::{Worker, WorkerPool, WorkerStatus};
pub use queue::DispatchQueue;
pub use schedule::{CronEvaluator, LeaderElector, ScheduleEvaluator, SingleNodeElector};
pub use scheduler::{AdmissionOutcome, AdmissionSource, Scheduler};
