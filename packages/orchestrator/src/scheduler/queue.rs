//! Dispatch queue for jobs that were admissible but found no free slot.
//!
//! Ordering: priority descending, ties broken FIFO by the instant the job
//! became eligible. One entry per job; re-queuing an already queued job is
//! a no-op.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QueuedJob {
    job_id: Uuid,
    priority: i32,
    eligible_at: DateTime<Utc>,
    seq: u64,
}

/// Priority queue with deterministic FIFO tie-break.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    entries: Vec<QueuedJob>,
    next_seq: u64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job. Returns false if it was already queued.
    pub fn push(&mut self, job_id: Uuid, priority: i32) -> bool {
        if self.entries.iter().any(|e| e.job_id == job_id) {
            return false;
        }
        self.entries.push(QueuedJob {
            job_id,
            priority,
            eligible_at: Utc::now(),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }

    /// Take the next job to dispatch: highest priority, earliest eligibility.
    pub fn pop(&mut self) -> Option<Uuid> {
        let best = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.priority, std::cmp::Reverse(e.seq)))
            .map(|(i, _)| i)?;
        Some(self.entries.remove(best).job_id)
    }

    /// Remove a job from the queue, e.g. on cancel. Returns whether it was queued.
    pub fn remove(&mut self, job_id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.job_id != job_id);
        self.entries.len() != before
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.entries.iter().any(|e| e.job_id == job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued job IDs in dispatch order, oldest-eligible first within a priority.
    pub fn jobs(&self) -> Vec<Uuid> {
        let mut sorted: Vec<&QueuedJob> = self.entries.iter().collect();
        sorted.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.seq));
        sorted.iter().map(|e| e.job_id).collect()
    }

    /// Earliest eligibility time for a queued job, for observability.
    pub fn eligible_since(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|e| e.job_id == job_id)
            .map(|e| e.eligible_at)
    }
}
