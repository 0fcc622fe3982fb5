//! Orchestration core for the content-crawling service.
//!
//! Owns crawl jobs and their lifecycle, dispatches them across a bounded
//! worker pool, reacts to webhooks and pub/sub channel messages, and keeps
//! job state in sync with source lifecycle events consumed from a shared
//! durable log.
//!
//! ```text
//!                       ┌──────────────┐
//!  webhooks ──────────► │              │
//!  channel messages ──► │TriggerRouter │──┐
//!                       └──────────────┘  │ admission
//!                       ┌──────────────┐  ▼
//!  cron / interval ───► │  Scheduler   │────► worker pool ──► JobExecutor
//!  force-run ─────────► │              │          │
//!                       └──────────────┘          ▼
//!                              ▲            JobRepository
//!                       ┌──────────────┐    (executions, status)
//!  source events ─────► │EventConsumer │
//!  (consumer group)     └──────────────┘
//! ```
//!
//! The HTTP surface, persistence backend, and crawl engine live outside
//! this crate behind the [`jobs::JobRepository`], [`scheduler::JobExecutor`],
//! [`triggers::ChannelTransport`], and [`events::EventLog`] seams.

pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod scheduler;
pub mod telemetry;
pub mod triggers;

pub use config::{ConsumerConfig, SchedulerConfig};
pub use error::{DenialReason, OrchestratorError, Result};
