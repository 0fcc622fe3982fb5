//! Job repository trait and the in-memory implementation.
//!
//! Persistence is a collaborator, not a concern of the core: the scheduler
//! only ever writes through explicit transitions (`set_status`,
//! `begin_execution`, `finish_execution`) so replicas never race on
//! read-then-write updates. The in-memory implementation backs tests and
//! single-process deployments; a database-backed one plugs in behind the
//! same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::execution::{ExecutionReport, ExecutionStatus, JobExecution};
use super::job::{validate_dependencies, Job, JobStatus};
use crate::error::{OrchestratorError, Result};

/// Filter and pagination for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub min_priority: Option<i32>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl JobFilter {
    pub fn by_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Storage contract for jobs and their execution history.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Validate and persist a new job.
    async fn create(&self, job: Job) -> Result<Job>;

    async fn get(&self, id: Uuid) -> Result<Job>;

    /// List jobs ordered by creation time.
    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>>;

    /// Validate and persist an update. Identity and creation time are immutable.
    async fn update(&self, job: Job) -> Result<Job>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Atomic status transition. Illegal transitions are rejected.
    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<Job>;

    /// Append a new running execution with the next `execution_number`,
    /// marking the job running. Fails if an execution is already running,
    /// which backstops the scheduler's single-flight check at the store.
    async fn begin_execution(&self, job_id: Uuid, retry_attempt: u32) -> Result<JobExecution>;

    /// Finalize an execution and reflect its outcome on the job status.
    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        report: ExecutionReport,
        error: Option<String>,
    ) -> Result<JobExecution>;

    /// Most recent execution for a job, by `execution_number`.
    async fn latest_execution(&self, job_id: Uuid) -> Result<Option<JobExecution>>;

    /// Full execution history for a job, oldest first.
    async fn executions(&self, job_id: Uuid) -> Result<Vec<JobExecution>>;

    /// All jobs linked to a source configuration.
    async fn jobs_for_source(&self, source_id: Uuid) -> Result<Vec<Job>>;
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    executions: HashMap<Uuid, Vec<JobExecution>>,
}

impl Inner {
    fn dependency_graph(&self) -> HashMap<Uuid, Vec<Uuid>> {
        self.jobs
            .iter()
            .map(|(id, job)| (*id, job.depends_on.clone()))
            .collect()
    }
}

/// In-memory job repository.
#[derive(Default)]
pub struct InMemoryJobRepository {
    inner: RwLock<Inner>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, mut job: Job) -> Result<Job> {
        job.validate()?;
        let mut inner = self.inner.write().await;

        let mut graph = inner.dependency_graph();
        graph.insert(job.id, job.depends_on.clone());
        validate_dependencies(&job, &graph)?;

        job.updated_at = Utc::now();
        inner.jobs.insert(job.id, job.clone());
        inner.executions.entry(job.id).or_default();
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::job_not_found(id))
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.min_priority.map_or(true, |p| j.priority >= p))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));

        let jobs = jobs
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(jobs)
    }

    async fn update(&self, mut job: Job) -> Result<Job> {
        job.validate()?;
        let mut inner = self.inner.write().await;

        let existing = inner
            .jobs
            .get(&job.id)
            .cloned()
            .ok_or_else(|| OrchestratorError::job_not_found(job.id))?;

        let mut graph = inner.dependency_graph();
        graph.insert(job.id, job.depends_on.clone());
        validate_dependencies(&job, &graph)?;

        job.created_at = existing.created_at;
        job.updated_at = Utc::now();
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.jobs.remove(&id).is_none() {
            return Err(OrchestratorError::job_not_found(id));
        }
        inner.executions.remove(&id);
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<Job> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::job_not_found(id))?;

        if !job.status.can_transition_to(status) {
            return Err(OrchestratorError::InvalidState {
                operation: "set_status",
                status: job.status.to_string(),
            });
        }
        job.status = status;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn begin_execution(&self, job_id: Uuid, retry_attempt: u32) -> Result<JobExecution> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job_id) {
            return Err(OrchestratorError::job_not_found(job_id));
        }

        let history = inner.executions.entry(job_id).or_default();
        if history
            .iter()
            .any(|e| e.status == ExecutionStatus::Running)
        {
            return Err(OrchestratorError::AdmissionDenied(
                crate::error::DenialReason::AlreadyRunning,
            ));
        }

        let execution_number = history
            .iter()
            .map(|e| e.execution_number)
            .max()
            .unwrap_or(0)
            + 1;
        let execution = JobExecution::start(job_id, execution_number, retry_attempt);
        history.push(execution.clone());

        // Single write guard covers both the execution append and the job
        // transition, so no reader observes one without the other.
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::job_not_found(job_id))?;
        job.status = JobStatus::Running;
        job.last_run_at = Some(execution.started_at);
        job.updated_at = Utc::now();

        Ok(execution)
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        report: ExecutionReport,
        error: Option<String>,
    ) -> Result<JobExecution> {
        let mut inner = self.inner.write().await;

        let mut finished: Option<JobExecution> = None;
        let mut job_id = None;
        for (jid, history) in inner.executions.iter_mut() {
            if let Some(exec) = history.iter_mut().find(|e| e.id == execution_id) {
                if exec.status.is_terminal() {
                    return Err(OrchestratorError::InvalidState {
                        operation: "finish_execution",
                        status: format!("{:?}", exec.status),
                    });
                }
                exec.finish(status, report, error);
                finished = Some(exec.clone());
                job_id = Some(*jid);
                break;
            }
        }

        let execution = finished.ok_or_else(|| OrchestratorError::NotFound {
            kind: "execution",
            id: execution_id.to_string(),
        })?;

        if let Some(job) = job_id.and_then(|id| inner.jobs.get_mut(&id)) {
            job.status = match status {
                ExecutionStatus::Completed => JobStatus::Completed,
                ExecutionStatus::Failed => JobStatus::Failed,
                ExecutionStatus::Cancelled => JobStatus::Cancelled,
                ExecutionStatus::Running => JobStatus::Running,
            };
            job.updated_at = Utc::now();
        }

        Ok(execution)
    }

    async fn latest_execution(&self, job_id: Uuid) -> Result<Option<JobExecution>> {
        let inner = self.inner.read().await;
        Ok(inner
            .executions
            .get(&job_id)
            .and_then(|h| h.iter().max_by_key(|e| e.execution_number))
            .cloned())
    }

    async fn executions(&self, job_id: Uuid) -> Result<Vec<JobExecution>> {
        let inner = self.inner.read().await;
        let mut history = inner.executions.get(&job_id).cloned().unwrap_or_default();
        history.sort_by_key(|e| e.execution_number);
        Ok(history)
    }

    async fn jobs_for_source(&self, source_id: Uuid) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.source_id == source_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }
}
