//! Shared harness wiring the full orchestration stack against in-memory
//! collaborators.

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::config::{ConsumerConfig, SchedulerConfig};
use orchestrator_core::events::{EventConsumer, InMemoryEventLog, SourceSyncHandler};
use orchestrator_core::jobs::{
    InMemoryJobRepository, IntervalUnit, Job, JobRepository, JobStatus, ScheduleSpec,
};
use orchestrator_core::scheduler::{MockExecutor, Scheduler};
use orchestrator_core::triggers::{InMemoryChannelTransport, TriggerRouter};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Harness {
    pub repo: Arc<InMemoryJobRepository>,
    pub executor: Arc<MockExecutor>,
    pub scheduler: Arc<Scheduler>,
    pub transport: Arc<InMemoryChannelTransport>,
    pub router: Arc<TriggerRouter>,
    pub log: Arc<InMemoryEventLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig {
            max_workers: 2,
            tick_interval: Duration::from_millis(25),
            drain_timeout: Duration::from_secs(2),
            failure_threshold: 3,
            breaker_cooldown: Duration::from_millis(80),
        })
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let repo = Arc::new(InMemoryJobRepository::new());
        let executor = Arc::new(MockExecutor::new());
        let scheduler = Arc::new(Scheduler::new(repo.clone(), executor.clone(), config));
        let transport = Arc::new(InMemoryChannelTransport::new());
        let router = Arc::new(TriggerRouter::new(
            scheduler.clone(),
            repo.clone(),
            Some(transport.clone()),
        ));
        router.start();
        let log = Arc::new(InMemoryEventLog::new());
        Self {
            repo,
            executor,
            scheduler,
            transport,
            router,
            log,
        }
    }

    /// Spawn an event consumer replica wired to the sync handler. Returns
    /// the shutdown token; cancel it to stop the replica.
    pub fn spawn_consumer(&self, name: &str) -> CancellationToken {
        let handler = Arc::new(SourceSyncHandler::new(
            self.repo.clone(),
            self.scheduler.clone(),
            self.router.clone(),
        ));
        let config = ConsumerConfig {
            batch_size: 8,
            block_timeout: Duration::from_millis(20),
            reclaim_interval: Duration::from_millis(40),
            idle_threshold: Duration::from_millis(80),
            read_backoff: Duration::from_millis(10),
            ..ConsumerConfig::default()
        }
        .with_consumer_name(name);
        let consumer = Arc::new(EventConsumer::new(self.log.clone(), handler, config));
        let shutdown = CancellationToken::new();
        tokio::spawn(consumer.run(shutdown.clone()));
        shutdown
    }

    /// Poll until the job reaches the given status, panicking after two
    /// seconds.
    pub async fn wait_status(&self, job_id: Uuid, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if self.repo.get(job_id).await.unwrap().status == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job never reached {status}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the job holds a worker slot.
    pub async fn wait_executing(&self, job_id: Uuid) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !self.scheduler.is_executing(job_id).await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "job never started executing"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the group's pending list is empty.
    pub async fn wait_acked(&self, group: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.log.pending_count(group).await != 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "entries never acknowledged"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn event_job(source_id: Uuid) -> Job {
    Job::new(source_id, "https://example.org/listings", ScheduleSpec::Event)
}

pub fn interval_job(source_id: Uuid, every: u64, unit: IntervalUnit) -> Job {
    Job::new(
        source_id,
        "https://example.org/listings",
        ScheduleSpec::Interval { every, unit },
    )
}

/// Poll a synchronous condition, panicking after two seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never held"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
