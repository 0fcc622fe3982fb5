//! The scheduler: eligibility passes, serialized admission, and the worker
//! pool lifecycle.
//!
//! # Architecture
//!
//! ```text
//! tick loop (leader only for time-based dispatch)
//!     │
//!     ├─► eligibility pass over the repository
//!     │       └─► admit(job, Timer)
//!     │
//! triggers / force-run (any replica)
//!     └─► admit(job, Webhook | Channel | ForceRun)
//!             │
//!             └─► serialized admission: single-flight → dependencies →
//!                 circuit breaker → draining → slot (or priority queue)
//!                     └─► spawn execution task (timeout + cancel token)
//!                             └─► finish_execution, release slot,
//!                                 drain the queue
//! ```
//!
//! Every admission attempt, whatever triggered it, goes through [`Scheduler::admit`]
//! under one lock; time-based dispatch, webhooks, channel messages, and
//! force-run cannot race each other into a double execution.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::circuit_breaker::CircuitBreaker;
use super::executor::JobExecutor;
use super::health::{ExecutionCounters, SchedulerHealth, SchedulerMetrics, WorkerPoolSnapshot};
use super::pool::WorkerPool;
use super::queue::DispatchQueue;
use super::schedule::{CronEvaluator, LeaderElector, ScheduleEvaluator, SingleNodeElector};
use crate::config::SchedulerConfig;
use crate::error::{DenialReason, OrchestratorError, Result};
use crate::jobs::{
    ExecutionReport, ExecutionStatus, Job, JobExecution, JobFilter, JobRepository, JobStatus,
    ScheduleSpec,
};

/// What caused an admission attempt. Logged, and consulted for the few
/// source-specific rules (force-run may revive a cancelled job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionSource {
    Timer,
    ForceRun,
    Webhook,
    Channel,
    Queue,
}

impl AdmissionSource {
    fn as_str(self) -> &'static str {
        match self {
            AdmissionSource::Timer => "timer",
            AdmissionSource::ForceRun => "force_run",
            AdmissionSource::Webhook => "webhook",
            AdmissionSource::Channel => "channel",
            AdmissionSource::Queue => "queue",
        }
    }
}

/// Result of a successful admission attempt.
#[derive(Debug, Clone)]
pub enum AdmissionOutcome {
    /// A worker slot was assigned and an execution record created.
    Started(JobExecution),
    /// All slots busy; the job waits in the priority queue.
    Queued,
}

struct RunningExecution {
    cancel: CancellationToken,
    worker: usize,
}

struct CoreState {
    pool: WorkerPool,
    queue: DispatchQueue,
    breaker: CircuitBreaker,
    running: HashMap<Uuid, RunningExecution>,
    /// Jobs whose dependencies can no longer complete.
    blocked: HashSet<Uuid>,
    last_eligibility_check: Option<chrono::DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

enum ExecutionOutcome {
    Completed(ExecutionReport),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Orchestrates job dispatch across a bounded worker pool.
pub struct Scheduler {
    repo: Arc<dyn JobRepository>,
    executor: Arc<dyn JobExecutor>,
    evaluator: Arc<dyn ScheduleEvaluator>,
    elector: Arc<dyn LeaderElector>,
    config: SchedulerConfig,
    state: Mutex<CoreState>,
    running_flag: AtomicBool,
    started_at: Instant,
    counters: Counters,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        executor: Arc<dyn JobExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        let state = CoreState {
            pool: WorkerPool::new(config.max_workers),
            queue: DispatchQueue::new(),
            breaker: CircuitBreaker::new(config.failure_threshold, config.breaker_cooldown),
            running: HashMap::new(),
            blocked: HashSet::new(),
            last_eligibility_check: None,
        };
        Self {
            repo,
            executor,
            evaluator: Arc::new(CronEvaluator),
            elector: Arc::new(SingleNodeElector),
            config,
            state: Mutex::new(state),
            running_flag: AtomicBool::new(false),
            started_at: Instant::now(),
            counters: Counters::default(),
        }
    }

    /// Swap the next-run strategy (defaults to [`CronEvaluator`]).
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ScheduleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Swap the leader-election strategy (defaults to [`SingleNodeElector`]).
    pub fn with_elector(mut self, elector: Arc<dyn LeaderElector>) -> Self {
        self.elector = elector;
        self
    }

    /// Run the tick loop until the shutdown token fires. Executions in
    /// flight are not interrupted by shutdown; use
    /// [`drain_workers`](Self::drain_workers) first for a clean stop.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.running_flag.store(true, Ordering::SeqCst);
        info!(
            max_workers = self.config.max_workers,
            tick_secs = self.config.tick_interval.as_secs(),
            "scheduler starting"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.eligibility_pass().await;
                }
            }
        }

        self.running_flag.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }

    /// One eligibility pass: mark pending jobs as under management, admit
    /// due time-based and fresh immediate jobs, refresh the blocked set.
    pub async fn eligibility_pass(self: &Arc<Self>) {
        let now = Utc::now();
        let leader = self.elector.is_leader();

        let jobs = match self.repo.list(JobFilter::default()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                // Repository trouble: skip this pass, the next tick retries.
                error!(error = %e, "eligibility pass failed to list jobs");
                return;
            }
        };

        let mut blocked = HashSet::new();
        for job in &jobs {
            if !job.depends_on.is_empty() && self.dependencies_blocked(job, &jobs) {
                blocked.insert(job.id);
            }
        }

        for job in &jobs {
            // Bring fresh time-based/event jobs under management.
            if job.status == JobStatus::Pending
                && job.schedule_enabled
                && (job.schedule.is_time_based() || job.schedule == ScheduleSpec::Event)
            {
                if let Err(e) = self.repo.set_status(job.id, JobStatus::Scheduled).await {
                    debug!(job_id = %job.id, error = %e, "could not mark job scheduled");
                }
            }

            if !leader {
                // Non-leaders never time-dispatch; triggered admission still
                // flows through admit() from the router.
                continue;
            }
            if !job.status.is_admissible() || blocked.contains(&job.id) {
                continue;
            }

            let due = match &job.schedule {
                ScheduleSpec::Immediate => {
                    // Eligible exactly once: only while it has never run.
                    matches!(self.repo.latest_execution(job.id).await, Ok(None))
                }
                spec if spec.is_time_based() => {
                    if !job.schedule_enabled {
                        false
                    } else {
                        let after = job.last_run_at.unwrap_or(job.created_at);
                        self.evaluator
                            .next_run(&job.schedule, after)
                            .map_or(false, |next| next <= now)
                    }
                }
                _ => false,
            };

            if due {
                match self.admit(job.id, AdmissionSource::Timer).await {
                    Ok(AdmissionOutcome::Started(exec)) => {
                        debug!(job_id = %job.id, execution = exec.execution_number, "dispatched on schedule");
                    }
                    Ok(AdmissionOutcome::Queued) => {
                        debug!(job_id = %job.id, "queued: no free worker");
                    }
                    Err(e) => {
                        debug!(job_id = %job.id, error = %e, "schedule dispatch denied");
                    }
                }
            }
        }

        let mut state = self.state.lock().await;
        state.blocked = blocked;
        state.last_eligibility_check = Some(now);
    }

    /// The serialized admission path shared by every trigger source.
    ///
    /// Checks, in order: single-flight, dependency satisfaction, circuit
    /// breaker, drain state, slot availability. A job that passes every
    /// gate but finds no free slot is queued by priority.
    pub async fn admit(
        self: &Arc<Self>,
        job_id: Uuid,
        source: AdmissionSource,
    ) -> Result<AdmissionOutcome> {
        let job = self.repo.get(job_id).await?;
        let mut state = self.state.lock().await;

        // (a) single-flight
        if state.running.contains_key(&job_id) || job.status == JobStatus::Running {
            return Err(OrchestratorError::AdmissionDenied(
                DenialReason::AlreadyRunning,
            ));
        }

        match job.status {
            JobStatus::Paused => {
                return Err(OrchestratorError::AdmissionDenied(
                    DenialReason::SchedulingDisabled,
                ));
            }
            JobStatus::Cancelled => {
                if source != AdmissionSource::ForceRun {
                    return Err(OrchestratorError::AdmissionDenied(
                        DenialReason::SchedulingDisabled,
                    ));
                }
                // Force-run revives a cancelled job through pending.
                self.repo.set_status(job_id, JobStatus::Pending).await?;
            }
            _ => {}
        }

        // (b) dependencies
        if !self.dependencies_satisfied(&job).await? {
            return Err(OrchestratorError::AdmissionDenied(
                DenialReason::DependenciesUnmet,
            ));
        }

        // (c) circuit breaker
        if !state.breaker.admissible() {
            return Err(OrchestratorError::AdmissionDenied(DenialReason::CircuitOpen));
        }

        // (d) drain state, then slot
        if state.pool.is_draining() {
            return Err(OrchestratorError::AdmissionDenied(DenialReason::Draining));
        }
        let Some(worker) = state.pool.assign(job_id) else {
            state.queue.push(job_id, job.priority);
            debug!(job_id = %job_id, source = source.as_str(), "admission queued");
            return Ok(AdmissionOutcome::Queued);
        };

        self.start_execution(&mut state, job, worker, source).await
    }

    async fn start_execution(
        self: &Arc<Self>,
        state: &mut CoreState,
        job: Job,
        worker: usize,
        source: AdmissionSource,
    ) -> Result<AdmissionOutcome> {
        let retry_attempt = match self.repo.latest_execution(job.id).await {
            Ok(Some(prev))
                if matches!(
                    prev.status,
                    ExecutionStatus::Failed | ExecutionStatus::Cancelled
                ) =>
            {
                prev.retry_attempt + 1
            }
            _ => 0,
        };

        let execution = match self.repo.begin_execution(job.id, retry_attempt).await {
            Ok(execution) => execution,
            Err(e) => {
                state.pool.release(worker);
                return Err(e);
            }
        };

        state.breaker.on_dispatch();
        let cancel = CancellationToken::new();
        state.running.insert(
            job.id,
            RunningExecution {
                cancel: cancel.clone(),
                worker,
            },
        );
        state.blocked.remove(&job.id);
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        info!(
            job_id = %job.id,
            execution = execution.execution_number,
            worker,
            source = source.as_str(),
            "execution started"
        );

        let this = Arc::clone(self);
        let spawned_execution = execution.clone();
        tokio::spawn(async move {
            this.run_execution(job, spawned_execution, worker, cancel)
                .await;
        });

        Ok(AdmissionOutcome::Started(execution))
    }

    async fn run_execution(
        self: Arc<Self>,
        job: Job,
        execution: JobExecution,
        worker: usize,
        cancel: CancellationToken,
    ) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => ExecutionOutcome::Cancelled,
            result = tokio::time::timeout(
                job.timeout,
                self.executor.execute(&job, cancel.child_token()),
            ) => match result {
                Ok(Ok(report)) => ExecutionOutcome::Completed(report),
                // The select is unbiased: a cancelled executor may surface
                // its own error before the cancellation branch wins the
                // race. A cancel is a cancel either way, and must not be
                // recorded as a failure or feed the breaker.
                Ok(Err(_)) if cancel.is_cancelled() => ExecutionOutcome::Cancelled,
                Ok(Err(e)) => ExecutionOutcome::Failed(format!("{e:#}")),
                Err(_) if cancel.is_cancelled() => ExecutionOutcome::Cancelled,
                Err(_) => ExecutionOutcome::TimedOut,
            },
        };

        let (status, report, error_msg) = match outcome {
            ExecutionOutcome::Completed(report) => (ExecutionStatus::Completed, report, None),
            ExecutionOutcome::Failed(msg) => {
                (ExecutionStatus::Failed, ExecutionReport::default(), Some(msg))
            }
            ExecutionOutcome::TimedOut => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                (
                    ExecutionStatus::Failed,
                    ExecutionReport::default(),
                    Some(format!(
                        "execution exceeded timeout of {}s",
                        job.timeout.as_secs()
                    )),
                )
            }
            ExecutionOutcome::Cancelled => (
                ExecutionStatus::Cancelled,
                ExecutionReport::default(),
                Some("cancelled".to_string()),
            ),
        };

        if let Err(e) = self
            .repo
            .finish_execution(execution.id, status, report, error_msg.clone())
            .await
        {
            error!(job_id = %job.id, execution_id = %execution.id, error = %e, "failed to record execution outcome");
        }

        match status {
            ExecutionStatus::Completed => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(job_id = %job.id, execution = execution.execution_number, "execution completed");
            }
            ExecutionStatus::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    job_id = %job.id,
                    execution = execution.execution_number,
                    error = error_msg.as_deref().unwrap_or("unknown"),
                    "execution failed"
                );
            }
            ExecutionStatus::Cancelled => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                info!(job_id = %job.id, execution = execution.execution_number, "execution cancelled");
            }
            ExecutionStatus::Running => unreachable!("outcome is always terminal"),
        }

        {
            let mut state = self.state.lock().await;
            state.pool.release(worker);
            state.running.remove(&job.id);
            match status {
                ExecutionStatus::Completed => state.breaker.record_success(),
                ExecutionStatus::Failed => state.breaker.record_failure(),
                // Cancellation says nothing about system health.
                _ => {}
            }
        }

        self.dispatch_queued().await;
    }

    /// Hand freed slots to queued jobs, highest priority first.
    ///
    /// Boxed: this re-enters `admit`, whose spawned execution task calls
    /// back into this method, so the future type must be named to close
    /// the cycle.
    fn dispatch_queued<'a>(self: &'a Arc<Self>) -> BoxFuture<'a, ()> {
        async move {
            loop {
                let next = {
                    let mut state = self.state.lock().await;
                    if state.pool.is_draining() || state.pool.idle_count() == 0 {
                        return;
                    }
                    state.queue.pop()
                };
                let Some(job_id) = next else { return };

                match self.admit(job_id, AdmissionSource::Queue).await {
                    Ok(AdmissionOutcome::Started(_)) => continue,
                    Ok(AdmissionOutcome::Queued) => return,
                    Err(e) => {
                        // The job's moment passed while it waited; if it is
                        // time-based the next eligibility pass reconsiders it.
                        debug!(job_id = %job_id, error = %e, "queued job no longer admissible");
                    }
                }
            }
        }
        .boxed()
    }

    /// Bypass schedule-type gating and admit now. Single-flight, dependency,
    /// and circuit-breaker checks still apply; fails with `Unavailable`
    /// while the pool is draining.
    pub async fn force_run(self: &Arc<Self>, job_id: Uuid) -> Result<AdmissionOutcome> {
        match self.admit(job_id, AdmissionSource::ForceRun).await {
            Err(OrchestratorError::AdmissionDenied(DenialReason::Draining)) => Err(
                OrchestratorError::Unavailable("worker pool is draining".into()),
            ),
            other => other,
        }
    }

    /// Cancel a job. Running: signal the worker and let it record the
    /// cancelled outcome. Queued: remove from the queue. Otherwise the job
    /// must be pending/scheduled/paused.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if let Some(running) = state.running.get(&job_id) {
                info!(job_id = %job_id, "signalling cancellation to running execution");
                running.cancel.cancel();
                return Ok(());
            }
            if state.queue.remove(job_id) {
                drop(state);
                self.repo.set_status(job_id, JobStatus::Cancelled).await?;
                return Ok(());
            }
        }

        let job = self.repo.get(job_id).await?;
        match job.status {
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Paused => {
                self.repo.set_status(job_id, JobStatus::Cancelled).await?;
                Ok(())
            }
            status => Err(OrchestratorError::InvalidState {
                operation: "cancel",
                status: status.to_string(),
            }),
        }
    }

    /// Suspend autonomous dispatch without losing schedule configuration.
    pub async fn pause_job(&self, job_id: Uuid) -> Result<Job> {
        {
            let mut state = self.state.lock().await;
            state.queue.remove(job_id);
        }
        let job = self.repo.get(job_id).await?;
        match job.status {
            JobStatus::Pending | JobStatus::Scheduled => {
                self.repo.set_status(job_id, JobStatus::Paused).await
            }
            status => Err(OrchestratorError::InvalidState {
                operation: "pause",
                status: status.to_string(),
            }),
        }
    }

    /// Restore autonomous dispatch for a paused job.
    pub async fn resume_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.repo.get(job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(OrchestratorError::InvalidState {
                operation: "resume",
                status: job.status.to_string(),
            });
        }
        let next = if job.schedule_enabled
            && (job.schedule.is_time_based() || job.schedule == ScheduleSpec::Event)
        {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };
        self.repo.set_status(job_id, next).await
    }

    /// Stop admitting new executions and wait for active ones to finish,
    /// up to the configured drain timeout. Executions still running at the
    /// deadline are left running but no longer block drain completion.
    pub async fn drain_workers(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.pool.start_draining();
        }
        info!("worker pool draining");

        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            let active = self.state.lock().await.pool.active_count();
            if active == 0 {
                info!("worker pool drained");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(active, "drain deadline elapsed with executions still running");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Resume normal admission after a drain.
    pub async fn resume_workers(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.pool.stop_draining();
        }
        info!("worker pool resumed");
        self.dispatch_queued().await;
        Ok(())
    }

    fn dependencies_blocked(&self, job: &Job, all_jobs: &[Job]) -> bool {
        job.depends_on.iter().any(|dep| {
            match all_jobs.iter().find(|j| j.id == *dep) {
                // A deleted dependency can never complete again.
                None => true,
                Some(dep_job) => dep_job.status == JobStatus::Cancelled,
            }
        })
    }

    async fn dependencies_satisfied(&self, job: &Job) -> Result<bool> {
        for dep in &job.depends_on {
            let satisfied = matches!(
                self.repo.latest_execution(*dep).await?,
                Some(exec) if exec.status == ExecutionStatus::Completed
            );
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Health snapshot. Never fails; repository trouble degrades counts to
    /// zero rather than erroring.
    pub async fn health(&self) -> SchedulerHealth {
        let time_based_jobs = self
            .repo
            .list(JobFilter::default())
            .await
            .map(|jobs| {
                jobs.iter()
                    .filter(|j| {
                        j.schedule.is_time_based()
                            && j.schedule_enabled
                            && !matches!(j.status, JobStatus::Paused | JobStatus::Cancelled)
                    })
                    .count()
            })
            .unwrap_or(0);

        let state = self.state.lock().await;
        SchedulerHealth {
            running: self.running_flag.load(Ordering::SeqCst),
            leader: self.elector.is_leader(),
            active_workers: state.pool.active_count(),
            idle_workers: state.pool.idle_count(),
            draining: state.pool.is_draining(),
            queue_depth: state.queue.len(),
            time_based_jobs,
            blocked_jobs: state.blocked.len(),
            last_eligibility_check: state.last_eligibility_check,
            uptime_secs: self.started_at.elapsed().as_secs(),
            circuit_breaker: state.breaker.state(),
        }
    }

    pub async fn pool_snapshot(&self) -> WorkerPoolSnapshot {
        let state = self.state.lock().await;
        WorkerPoolSnapshot {
            size: state.pool.size(),
            draining: state.pool.is_draining(),
            workers: state.pool.snapshot(),
        }
    }

    pub async fn metrics(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            health: self.health().await,
            pool: self.pool_snapshot().await,
            executions: ExecutionCounters {
                started: self.counters.started.load(Ordering::Relaxed),
                completed: self.counters.completed.load(Ordering::Relaxed),
                failed: self.counters.failed.load(Ordering::Relaxed),
                cancelled: self.counters.cancelled.load(Ordering::Relaxed),
                timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            },
        }
    }

    /// Whether a job currently holds a worker slot.
    pub async fn is_executing(&self, job_id: Uuid) -> bool {
        self.state.lock().await.running.contains_key(&job_id)
    }

    /// Wait until no execution is in flight for the job, bounded by
    /// `timeout`. Test and shutdown helper.
    pub async fn wait_idle(&self, job_id: Uuid, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_executing(job_id).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
