//! Bounded worker pool owned by the scheduler.
//!
//! Workers are slots, not threads: each active slot corresponds to one
//! spawned execution task. The pool is never persisted and is only touched
//! through the scheduler's serialized admission path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Status of a single worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Active,
    Draining,
}

/// A slot in the bounded pool.
#[derive(Debug, Clone, Serialize)]
pub struct Worker {
    pub id: usize,
    pub status: WorkerStatus,
    /// Job currently executing in this slot, if any.
    pub job_id: Option<Uuid>,
    /// Start time of the current work.
    pub started_at: Option<DateTime<Utc>>,
}

/// Fixed-size pool of worker slots with a drain flag.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    draining: bool,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let workers = (0..size)
            .map(|id| Worker {
                id,
                status: WorkerStatus::Idle,
                job_id: None,
                started_at: None,
            })
            .collect();
        Self {
            workers,
            draining: false,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Assign the first idle slot to a job. `None` when the pool is full
    /// or draining.
    pub fn assign(&mut self, job_id: Uuid) -> Option<usize> {
        if self.draining {
            return None;
        }
        let worker = self
            .workers
            .iter_mut()
            .find(|w| w.status == WorkerStatus::Idle)?;
        worker.status = WorkerStatus::Active;
        worker.job_id = Some(job_id);
        worker.started_at = Some(Utc::now());
        Some(worker.id)
    }

    /// Return a slot to the pool once its execution finishes.
    pub fn release(&mut self, worker_id: usize) {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.status = if self.draining {
                WorkerStatus::Draining
            } else {
                WorkerStatus::Idle
            };
            worker.job_id = None;
            worker.started_at = None;
        }
    }

    /// Stop admitting new work. Active slots stay active until their
    /// executions finish; idle slots are marked draining.
    pub fn start_draining(&mut self) {
        self.draining = true;
        for worker in &mut self.workers {
            if worker.status == WorkerStatus::Idle {
                worker.status = WorkerStatus::Draining;
            }
        }
    }

    /// Resume normal admission.
    pub fn stop_draining(&mut self) {
        self.draining = false;
        for worker in &mut self.workers {
            if worker.status == WorkerStatus::Draining {
                worker.status = WorkerStatus::Idle;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Active)
            .count()
    }

    pub fn idle_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Idle)
            .count()
    }

    pub fn snapshot(&self) -> Vec<Worker> {
        self.workers.clone()
    }
}
