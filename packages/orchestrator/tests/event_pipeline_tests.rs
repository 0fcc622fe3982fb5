//! Integration tests for the trigger and event pipeline:
//! - a channel message drives an event job through admission end to end
//! - single-flight holds across concurrent trigger sources
//! - source lifecycle events consumed from the log reshape job state
//! - work orphaned by a dead consumer is reclaimed by a live replica

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{event_job, Harness};
use orchestrator_core::events::{EventLog, SourceEvent, SourceEventKind};
use orchestrator_core::jobs::{JobRepository, JobStatus};
use uuid::Uuid;

#[tokio::test]
async fn channel_message_runs_event_job_end_to_end() {
    let h = Harness::new();
    let gate = h.executor.hold_executions();
    let job = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    h.router
        .register_channel_trigger(job.id, "sources.test")
        .await
        .unwrap();

    h.scheduler.eligibility_pass().await;
    assert_eq!(h.repo.get(job.id).await.unwrap().status, JobStatus::Scheduled);

    h.transport.publish("sources.test", Bytes::new()).await;
    h.wait_executing(job.id).await;
    assert_eq!(h.repo.get(job.id).await.unwrap().status, JobStatus::Running);
    let first = h.repo.latest_execution(job.id).await.unwrap().unwrap();
    assert_eq!(first.execution_number, 1);

    // Second message before the first execution completes: denied, no
    // second execution.
    h.transport.publish("sources.test", Bytes::new()).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.repo.executions(job.id).await.unwrap().len(), 1);
    assert_eq!(h.repo.get(job.id).await.unwrap().status, JobStatus::Running);

    gate.release();
    assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
    assert_eq!(h.repo.executions(job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn source_disable_enable_cycle_flows_through_the_consumer() {
    let h = Harness::new();
    let source_id = Uuid::new_v4();
    let job = h.repo.create(event_job(source_id)).await.unwrap();
    let shutdown = h.spawn_consumer("replica-a");

    let disable = SourceEvent::new(
        source_id,
        SourceEventKind::Disabled {
            actor: Some("admin".to_string()),
            reason: Some("bad data".to_string()),
        },
    );
    h.log.append(disable.encode().unwrap()).await.unwrap();
    h.wait_status(job.id, JobStatus::Paused).await;

    let enable = SourceEvent::new(
        source_id,
        SourceEventKind::Enabled {
            actor: Some("admin".to_string()),
            reason: None,
        },
    );
    h.log.append(enable.encode().unwrap()).await.unwrap();
    h.wait_status(job.id, JobStatus::Scheduled).await;

    shutdown.cancel();
}

#[tokio::test]
async fn source_deletion_cancels_jobs_and_unregisters_triggers() {
    let h = Harness::new();
    let source_id = Uuid::new_v4();
    let job = h.repo.create(event_job(source_id)).await.unwrap();
    h.router
        .register_channel_trigger(job.id, "sources.test")
        .await
        .unwrap();
    h.router
        .register_webhook_trigger(job.id, "/hooks/site")
        .await
        .unwrap();
    let shutdown = h.spawn_consumer("replica-a");

    let deleted = SourceEvent::new(source_id, SourceEventKind::Deleted { reason: None });
    h.log.append(deleted.encode().unwrap()).await.unwrap();

    h.wait_status(job.id, JobStatus::Cancelled).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = h.router.status().await;
        if status.webhook_count == 0 && status.channel_count == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "triggers never unregistered"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Messages on the old channel no longer reach the job.
    h.transport.publish("sources.test", Bytes::new()).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!h.executor.was_invoked_for(job.id));

    shutdown.cancel();
}

#[tokio::test]
async fn orphaned_event_is_reclaimed_by_live_replica() {
    let h = Harness::new();
    let source_id = Uuid::new_v4();
    let job = h.repo.create(event_job(source_id)).await.unwrap();

    // A replica reads the event and dies before handling or acking it.
    h.log.ensure_group("crawl-orchestrator").await.unwrap();
    let deleted = SourceEvent::new(source_id, SourceEventKind::Deleted { reason: None });
    h.log.append(deleted.encode().unwrap()).await.unwrap();
    let stolen = h
        .log
        .read_group("crawl-orchestrator", "dead-replica", 8, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(stolen.len(), 1);
    assert_eq!(h.repo.get(job.id).await.unwrap().status, JobStatus::Pending);

    // A live replica reclaims it after the idle threshold and applies it.
    let shutdown = h.spawn_consumer("replica-b");
    h.wait_status(job.id, JobStatus::Cancelled).await;
    h.wait_acked("crawl-orchestrator").await;

    shutdown.cancel();
}

#[tokio::test]
async fn duplicate_delivery_across_replicas_converges() {
    let h = Harness::new();
    let source_id = Uuid::new_v4();
    let job = h.repo.create(event_job(source_id)).await.unwrap();
    let shutdown_a = h.spawn_consumer("replica-a");

    let deleted = SourceEvent::new(source_id, SourceEventKind::Deleted { reason: None });
    h.log.append(deleted.encode().unwrap()).await.unwrap();
    h.wait_status(job.id, JobStatus::Cancelled).await;

    // The same envelope appended again (producer retry): handling it a
    // second time leaves the same state.
    h.log.append(deleted.encode().unwrap()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.log.pending_count("crawl-orchestrator").await, 0);
    assert_eq!(h.repo.get(job.id).await.unwrap().status, JobStatus::Cancelled);

    shutdown_a.cancel();
}

#[tokio::test]
async fn webhook_and_channel_share_admission_rules() {
    let h = Harness::new();
    let gate = h.executor.hold_executions();
    let job = h.repo.create(event_job(Uuid::new_v4())).await.unwrap();
    h.router
        .register_webhook_trigger(job.id, "/hooks/site")
        .await
        .unwrap();
    h.router
        .register_channel_trigger(job.id, "sources.test")
        .await
        .unwrap();

    // Webhook starts it; a channel message for the same job is
    // single-flighted away.
    h.router.handle_webhook("/hooks/site").await.unwrap().unwrap();
    h.wait_executing(job.id).await;
    h.transport.publish("sources.test", Bytes::new()).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.repo.executions(job.id).await.unwrap().len(), 1);

    gate.release();
    assert!(h.scheduler.wait_idle(job.id, Duration::from_secs(1)).await);
}
