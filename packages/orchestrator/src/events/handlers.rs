//! Handler seam for source lifecycle events.
//!
//! The consumer owns routing and delivery guarantees; business logic lives
//! behind [`SourceEventHandler`]. Delivery is at-least-once and reclamation
//! can replay old entries after newer ones, so handlers dedupe on
//! `event_id` and must converge under out-of-order re-application.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::source_event::{SourceEvent, SourceEventKind};
use crate::error::OrchestratorError;
use crate::jobs::{JobRepository, JobStatus};
use crate::scheduler::Scheduler;
use crate::triggers::TriggerRouter;

/// One method per event kind; unimplemented kinds are no-ops.
#[async_trait]
pub trait SourceEventHandler: Send + Sync {
    async fn on_created(&self, _event: &SourceEvent) -> Result<()> {
        Ok(())
    }
    async fn on_updated(&self, _event: &SourceEvent) -> Result<()> {
        Ok(())
    }
    async fn on_deleted(&self, _event: &SourceEvent) -> Result<()> {
        Ok(())
    }
    async fn on_enabled(&self, _event: &SourceEvent) -> Result<()> {
        Ok(())
    }
    async fn on_disabled(&self, _event: &SourceEvent) -> Result<()> {
        Ok(())
    }

    /// Route an event to the method for its kind.
    async fn dispatch(&self, event: &SourceEvent) -> Result<()> {
        match &event.kind {
            SourceEventKind::Created { .. } => self.on_created(event).await,
            SourceEventKind::Updated { .. } => self.on_updated(event).await,
            SourceEventKind::Deleted { .. } => self.on_deleted(event).await,
            SourceEventKind::Enabled { .. } => self.on_enabled(event).await,
            SourceEventKind::Disabled { .. } => self.on_disabled(event).await,
        }
    }
}

/// Dedupe window for processed event IDs. The broker stops redelivering an
/// entry once it is acked, so the window only has to outlast reclamation of
/// in-flight duplicates, not the full stream history.
const PROCESSED_WINDOW: usize = 8192;

/// Insertion-ordered set of recently processed event IDs, evicting the
/// oldest entries past a fixed capacity.
struct ProcessedLedger {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ProcessedLedger {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if !self.seen.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Keeps job state consistent with source lifecycle: deleted sources get
/// their jobs cancelled and unscheduled, disabled sources get them paused
/// and their schedules switched off, enabled sources get them resumed.
/// Creation and updates are the outer service's concern and are only logged
/// here.
pub struct SourceSyncHandler {
    repo: Arc<dyn JobRepository>,
    scheduler: Arc<Scheduler>,
    router: Arc<TriggerRouter>,
    processed: RwLock<ProcessedLedger>,
}

impl SourceSyncHandler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        scheduler: Arc<Scheduler>,
        router: Arc<TriggerRouter>,
    ) -> Self {
        Self {
            repo,
            scheduler,
            router,
            processed: RwLock::new(ProcessedLedger::with_capacity(PROCESSED_WINDOW)),
        }
    }

    /// Dedupe on the event's idempotency key. Returns true the first time
    /// an event ID is seen.
    fn first_sighting(&self, event_id: &str) -> bool {
        let seen = self
            .processed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(event_id);
        !seen
    }

    fn mark_processed(&self, event_id: &str) {
        self.processed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event_id);
    }

    #[cfg(test)]
    pub fn processed_count(&self) -> usize {
        self.processed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl SourceEventHandler for SourceSyncHandler {
    async fn on_created(&self, event: &SourceEvent) -> Result<()> {
        info!(source_id = %event.source_id, event_id = %event.event_id, "source created");
        Ok(())
    }

    async fn on_updated(&self, event: &SourceEvent) -> Result<()> {
        debug!(source_id = %event.source_id, event_id = %event.event_id, "source updated");
        Ok(())
    }

    async fn on_deleted(&self, event: &SourceEvent) -> Result<()> {
        if !self.first_sighting(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate delivery, already processed");
            return Ok(());
        }

        let jobs = self.repo.jobs_for_source(event.source_id).await?;
        for job in jobs {
            self.router.unregister_job(job.id).await;
            match self.scheduler.cancel_job(job.id).await {
                Ok(()) => {
                    info!(job_id = %job.id, source_id = %event.source_id, "job cancelled, source deleted")
                }
                // Already terminal is fine, convergence is the point.
                Err(OrchestratorError::InvalidState { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.mark_processed(&event.event_id);
        Ok(())
    }

    async fn on_enabled(&self, event: &SourceEvent) -> Result<()> {
        if !self.first_sighting(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate delivery, already processed");
            return Ok(());
        }

        let jobs = self.repo.jobs_for_source(event.source_id).await?;
        for job in jobs {
            if !job.schedule_enabled {
                let mut update = job.clone();
                update.schedule_enabled = true;
                self.repo.update(update).await?;
            }
            if job.status != JobStatus::Paused {
                continue;
            }
            match self.scheduler.resume_job(job.id).await {
                Ok(resumed) => {
                    info!(job_id = %job.id, status = %resumed.status, "job resumed, source enabled")
                }
                Err(OrchestratorError::InvalidState { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.mark_processed(&event.event_id);
        Ok(())
    }

    async fn on_disabled(&self, event: &SourceEvent) -> Result<()> {
        if !self.first_sighting(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate delivery, already processed");
            return Ok(());
        }

        let jobs = self.repo.jobs_for_source(event.source_id).await?;
        for job in jobs {
            // Pausing only covers pending/scheduled jobs; a job sitting in
            // a post-run status would still be timer-dispatched, so the
            // schedule flag comes off regardless of status.
            if job.schedule_enabled {
                let mut update = job.clone();
                update.schedule_enabled = false;
                self.repo.update(update).await?;
            }
            match self.scheduler.pause_job(job.id).await {
                Ok(_) => info!(job_id = %job.id, "job paused, source disabled"),
                Err(OrchestratorError::InvalidState { .. }) => {
                    // Running executions finish on their own; terminal and
                    // already-paused jobs need nothing further.
                    debug!(job_id = %job.id, status = %job.status, "job not pausable, schedule flag cleared");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.mark_processed(&event.event_id);
        Ok(())
    }
}
