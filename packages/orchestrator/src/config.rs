//! Configuration for the scheduler, trigger router, and event consumer.

use std::time::Duration;

use uuid::Uuid;

/// Configuration for the scheduler and its worker pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently executing jobs.
    pub max_workers: usize,
    /// How often the eligibility pass runs.
    pub tick_interval: Duration,
    /// How long `drain_workers` waits for active executions before giving up.
    pub drain_timeout: Duration,
    /// Consecutive execution failures before the circuit breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a half-open trial.
    pub breaker_cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            tick_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            failure_threshold: 3,
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// Configuration for the source event consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group shared by all replicas of this service.
    pub group: String,
    /// Per-process consumer identity. Unique by default so replicas never collide.
    pub consumer_name: String,
    /// Maximum entries fetched per blocking read.
    pub batch_size: usize,
    /// Upper bound on how long a read blocks waiting for new entries.
    pub block_timeout: Duration,
    /// How often the reclamation loop scans for abandoned entries.
    pub reclaim_interval: Duration,
    /// Time since delivery after which a pending entry becomes claimable.
    pub idle_threshold: Duration,
    /// Sleep applied after a transient broker read error.
    pub read_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "crawl-orchestrator".to_string(),
            consumer_name: format!("consumer-{}", Uuid::new_v4()),
            batch_size: 16,
            block_timeout: Duration::from_secs(2),
            reclaim_interval: Duration::from_secs(30),
            idle_threshold: Duration::from_secs(60),
            read_backoff: Duration::from_secs(1),
        }
    }
}

impl ConsumerConfig {
    /// Override the generated consumer identity.
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }
}
