//! Consumer-group reader for the source event log.
//!
//! Two loops share nothing but the broker-side group state: the read loop
//! takes new entries assigned to this consumer, the reclaim loop takes over
//! entries a crashed or stalled replica left pending past the idle
//! threshold. Both acknowledge only after the handler succeeds, so a crash
//! between handling and acknowledgement replays the event (handlers dedupe
//! on event ID).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::SourceEventHandler;
use super::log::{EventLog, LogEntry};
use super::source_event::SourceEvent;
use crate::config::ConsumerConfig;

pub struct EventConsumer {
    log: Arc<dyn EventLog>,
    handler: Arc<dyn SourceEventHandler>,
    config: ConsumerConfig,
}

impl EventConsumer {
    pub fn new(
        log: Arc<dyn EventLog>,
        handler: Arc<dyn SourceEventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            log,
            handler,
            config,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.config.consumer_name
    }

    /// Ensure the group exists, then drive the read and reclaim loops
    /// until the shutdown token fires. In-flight handler calls finish
    /// before either loop exits.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> crate::error::Result<()> {
        self.log.ensure_group(&self.config.group).await?;
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer_name,
            "event consumer joining group"
        );

        let reader = Arc::clone(&self);
        let read_handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { reader.read_loop(shutdown).await }
        });
        let reclaimer = Arc::clone(&self);
        let reclaim_handle = tokio::spawn(async move { reclaimer.reclaim_loop(shutdown).await });

        let _ = tokio::join!(read_handle, reclaim_handle);
        info!(consumer = %self.config.consumer_name, "event consumer stopped");
        Ok(())
    }

    async fn read_loop(&self, shutdown: CancellationToken) {
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => return,
                batch = self.log.read_group(
                    &self.config.group,
                    &self.config.consumer_name,
                    self.config.batch_size,
                    self.config.block_timeout,
                ) => batch,
            };

            match batch {
                Ok(entries) => {
                    for entry in entries {
                        // One entry at a time; an entry is not acknowledged
                        // until its handler returns.
                        self.process_entry(entry).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "event log read failed, backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.config.read_backoff) => {}
                    }
                }
            }
        }
    }

    async fn reclaim_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.reclaim_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }

            match self
                .log
                .claim_idle(
                    &self.config.group,
                    &self.config.consumer_name,
                    self.config.idle_threshold,
                    self.config.batch_size,
                )
                .await
            {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    info!(
                        count = entries.len(),
                        consumer = %self.config.consumer_name,
                        "reclaimed orphaned entries"
                    );
                    for entry in entries {
                        self.process_entry(entry).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "reclaim scan failed, retrying next interval");
                }
            }
        }
    }

    /// Decode, dispatch, acknowledge. Handler failure leaves the entry
    /// pending for redelivery; decode failure is poison and is
    /// acknowledged after logging since retrying cannot help.
    async fn process_entry(&self, entry: LogEntry) {
        let event = match SourceEvent::decode(&entry.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(entry_id = %entry.id, error = %e, "poison entry, dropping");
                self.acknowledge(&entry.id).await;
                return;
            }
        };

        match self.handler.dispatch(&event).await {
            Ok(()) => {
                debug!(
                    entry_id = %entry.id,
                    event_id = %event.event_id,
                    kind = event.kind.name(),
                    delivery = entry.delivery_count,
                    "event handled"
                );
                self.acknowledge(&entry.id).await;
            }
            Err(e) => {
                warn!(
                    entry_id = %entry.id,
                    event_id = %event.event_id,
                    kind = event.kind.name(),
                    error = %e,
                    "handler failed, entry left pending for redelivery"
                );
            }
        }
    }

    async fn acknowledge(&self, entry_id: &str) {
        if let Err(e) = self.log.ack(&self.config.group, entry_id).await {
            error!(entry_id = %entry_id, error = %e, "acknowledgement failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::events::log::InMemoryEventLog;
    use crate::events::source_event::SourceEventKind;

    #[derive(Default)]
    struct CountingHandler {
        handled: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SourceEventHandler for CountingHandler {
        async fn dispatch(&self, _event: &SourceEvent) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("handler rejected event");
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(consumer: &str) -> ConsumerConfig {
        ConsumerConfig {
            batch_size: 8,
            block_timeout: Duration::from_millis(20),
            reclaim_interval: Duration::from_millis(40),
            idle_threshold: Duration::from_millis(60),
            read_backoff: Duration::from_millis(10),
            ..ConsumerConfig::default()
        }
        .with_consumer_name(consumer)
    }

    async fn append_event(log: &InMemoryEventLog) -> SourceEvent {
        let event = SourceEvent::new(Uuid::new_v4(), SourceEventKind::Deleted { reason: None });
        log.append(event.encode().unwrap()).await.unwrap();
        event
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn handled_events_are_acknowledged() {
        let log = Arc::new(InMemoryEventLog::new());
        let handler = Arc::new(CountingHandler::default());
        let consumer = Arc::new(EventConsumer::new(
            log.clone(),
            handler.clone(),
            config("c1"),
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        append_event(&log).await;
        append_event(&log).await;
        wait_for(|| handler.handled.load(Ordering::SeqCst) == 2).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while log.pending_count("crawl-orchestrator").await != 0 {
            assert!(tokio::time::Instant::now() < deadline, "entries never acked");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_handler_leaves_entry_pending() {
        let log = Arc::new(InMemoryEventLog::new());
        let handler = Arc::new(CountingHandler::default());
        handler.fail.store(true, Ordering::SeqCst);
        let consumer = Arc::new(EventConsumer::new(
            log.clone(),
            handler.clone(),
            config("c1"),
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        append_event(&log).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
        assert_eq!(log.pending_count("crawl-orchestrator").await, 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn orphaned_entries_are_reclaimed_by_another_consumer() {
        let log = Arc::new(InMemoryEventLog::new());
        log.ensure_group("crawl-orchestrator").await.unwrap();
        append_event(&log).await;

        // Consumer X reads but never acknowledges (simulating a crash).
        log.read_group(
            "crawl-orchestrator",
            "crashed",
            8,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(log.pending_count("crawl-orchestrator").await, 1);

        let handler = Arc::new(CountingHandler::default());
        let consumer = Arc::new(EventConsumer::new(
            log.clone(),
            handler.clone(),
            config("rescuer"),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        wait_for(|| handler.handled.load(Ordering::SeqCst) == 1).await;
        assert_eq!(log.pending_count("crawl-orchestrator").await, 0);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn poison_entries_are_logged_and_dropped() {
        let log = Arc::new(InMemoryEventLog::new());
        let handler = Arc::new(CountingHandler::default());
        let consumer = Arc::new(EventConsumer::new(
            log.clone(),
            handler.clone(),
            config("c1"),
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        log.append(Bytes::from_static(b"definitely not json"))
            .await
            .unwrap();
        let _ = append_event(&log).await;

        // The poison entry is acknowledged, the stream keeps moving.
        wait_for(|| handler.handled.load(Ordering::SeqCst) == 1).await;
        assert_eq!(log.pending_count("crawl-orchestrator").await, 0);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transient_read_errors_back_off_and_recover() {
        let log = Arc::new(InMemoryEventLog::new());
        let handler = Arc::new(CountingHandler::default());
        let consumer = Arc::new(EventConsumer::new(
            log.clone(),
            handler.clone(),
            config("c1"),
        ));

        log.set_fail_reads(true);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        append_event(&log).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);

        log.set_fail_reads(false);
        wait_for(|| handler.handled.load(Ordering::SeqCst) == 1).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_both_loops() {
        let log = Arc::new(InMemoryEventLog::new());
        let handler = Arc::new(CountingHandler::default());
        let consumer = Arc::new(EventConsumer::new(log, handler, config("c1")));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop")
            .unwrap()
            .unwrap();
    }
}
