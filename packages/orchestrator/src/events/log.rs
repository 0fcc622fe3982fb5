//! Durable-log abstraction with consumer-group semantics.
//!
//! The trait is shaped after Redis Streams (XGROUP / XREADGROUP / XACK /
//! XAUTOCLAIM) but any broker with at-least-once, consumer-group, and
//! idle-claim primitives fits behind it. The in-memory implementation
//! carries the full pending-ledger semantics so consumer behavior can be
//! tested without a broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::{OrchestratorError, Result};

/// One entry as delivered to a consumer.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Monotonic within the log.
    pub id: String,
    pub payload: Bytes,
    /// How many times this entry has been handed out, reclaims included.
    pub delivery_count: u32,
}

/// Append-only log with named consumer groups.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a payload. The producing side of the log; the orchestrator
    /// itself only consumes, but tests and local runs publish through this.
    async fn append(&self, payload: Bytes) -> Result<String>;

    /// Create the group if it does not exist. Idempotent.
    async fn ensure_group(&self, group: &str) -> Result<()>;

    /// Read up to `max` new entries for this consumer, blocking up to
    /// `block` when none are available. Delivered entries go on the group's
    /// pending list until acknowledged.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>>;

    /// Acknowledge an entry, removing it from the pending list. Unknown or
    /// already-acknowledged IDs are a no-op.
    async fn ack(&self, group: &str, entry_id: &str) -> Result<()>;

    /// Take ownership of up to `max` pending entries idle for at least
    /// `min_idle`, whichever consumer held them. Bumps delivery counts.
    async fn claim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<LogEntry>>;
}

struct StoredEntry {
    id: String,
    payload: Bytes,
}

struct PendingEntry {
    index: usize,
    #[allow(dead_code)]
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct Group {
    /// Index of the next never-delivered entry.
    cursor: usize,
    /// Delivered but unacknowledged, keyed by entry ID.
    pending: HashMap<String, PendingEntry>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<StoredEntry>,
    groups: HashMap<String, Group>,
    next_seq: u64,
}

/// In-memory event log for tests and local runs.
#[derive(Default)]
pub struct InMemoryEventLog {
    inner: Mutex<Inner>,
    appended: Notify,
    fail_reads: AtomicBool,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads fail until cleared, to exercise transient-error backoff.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Unacknowledged entry count for a group.
    pub async fn pending_count(&self, group: &str) -> usize {
        self.inner
            .lock()
            .await
            .groups
            .get(group)
            .map_or(0, |g| g.pending.len())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, payload: Bytes) -> Result<String> {
        let id = {
            let mut inner = self.inner.lock().await;
            inner.next_seq += 1;
            let id = format!("{}-0", inner.next_seq);
            inner.entries.push(StoredEntry {
                id: id.clone(),
                payload,
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Transport(
                "event log unavailable".to_string(),
            ));
        }

        let deadline = Instant::now() + block;
        loop {
            let notified = {
                let mut inner = self.inner.lock().await;
                let Inner {
                    entries, groups, ..
                } = &mut *inner;
                let group_state =
                    groups
                        .get_mut(group)
                        .ok_or_else(|| OrchestratorError::NotFound {
                            kind: "consumer group",
                            id: group.to_string(),
                        })?;

                if group_state.cursor < entries.len() {
                    let start = group_state.cursor;
                    let end = (start + max).min(entries.len());
                    group_state.cursor = end;

                    let mut delivered = Vec::with_capacity(end - start);
                    for entry in &entries[start..end] {
                        group_state.pending.insert(
                            entry.id.clone(),
                            PendingEntry {
                                index: start + delivered.len(),
                                consumer: consumer.to_string(),
                                delivered_at: Instant::now(),
                                delivery_count: 1,
                            },
                        );
                        delivered.push(LogEntry {
                            id: entry.id.clone(),
                            payload: entry.payload.clone(),
                            delivery_count: 1,
                        });
                    }
                    return Ok(delivered);
                }

                self.appended.notified()
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn ack(&self, group: &str, entry_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(group_state) = inner.groups.get_mut(group) {
            group_state.pending.remove(entry_id);
        }
        Ok(())
    }

    async fn claim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<LogEntry>> {
        let mut inner = self.inner.lock().await;
        let Inner {
            entries, groups, ..
        } = &mut *inner;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let mut claimable: Vec<&mut PendingEntry> = group_state
            .pending
            .values_mut()
            .filter(|p| p.delivered_at.elapsed() >= min_idle)
            .collect();
        claimable.sort_by_key(|p| p.index);

        let mut claimed = Vec::new();
        for pending in claimable.into_iter().take(max) {
            pending.consumer = consumer.to_string();
            pending.delivered_at = Instant::now();
            pending.delivery_count += 1;
            claimed.push(LogEntry {
                id: entries[pending.index].id.clone(),
                payload: entries[pending.index].payload.clone(),
                delivery_count: pending.delivery_count,
            });
        }
        Ok(claimed)
    }
}
