//! Translates external stimuli into job admissions.
//!
//! Webhook calls and pub/sub channel messages both land here and are routed
//! to the scheduler's admission path, so every trigger source is subject to
//! the same single-flight, dependency, and circuit-breaker rules as
//! force-run.
//!
//! Webhook matching: an exact pattern match wins; otherwise the longest
//! registered prefix of the inbound path wins. Channel matching is exact.
//! A pattern or channel can serve only one job at a time; registering a
//! second job under a taken key is rejected rather than silently replacing
//! the mapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{ChannelMessage, ChannelTransport};
use crate::error::{OrchestratorError, Result};
use crate::jobs::JobRepository;
use crate::scheduler::{AdmissionOutcome, AdmissionSource, Scheduler};

/// Observability snapshot of the trigger subsystem.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerStatus {
    pub running: bool,
    pub pubsub_enabled: bool,
    pub webhook_count: usize,
    pub channel_count: usize,
}

struct ChannelRegistration {
    job_id: Uuid,
    stop: CancellationToken,
}

#[derive(Default)]
struct RouterState {
    webhooks: HashMap<String, Uuid>,
    channels: HashMap<String, ChannelRegistration>,
}

/// Routes webhooks and channel messages to job admissions.
pub struct TriggerRouter {
    scheduler: Arc<Scheduler>,
    repo: Arc<dyn JobRepository>,
    transport: Option<Arc<dyn ChannelTransport>>,
    state: RwLock<RouterState>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl TriggerRouter {
    /// A router without a channel transport still serves webhook triggers;
    /// channel registrations fail with `Unavailable`.
    pub fn new(
        scheduler: Arc<Scheduler>,
        repo: Arc<dyn JobRepository>,
        transport: Option<Arc<dyn ChannelTransport>>,
    ) -> Self {
        Self {
            scheduler,
            repo,
            transport,
            state: RwLock::new(RouterState::default()),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Begin dispatching inbound channel messages. Registrations made
    /// before start are held and dispatch once started.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("trigger router started");
    }

    /// Stop dispatching and tear down channel subscriptions. Terminal; a
    /// stopped router does not restart.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        info!("trigger router stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether channel-based triggers are configured at all.
    pub fn is_pubsub_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn status(&self) -> TriggerStatus {
        let state = self.state.read().await;
        TriggerStatus {
            running: self.is_running(),
            pubsub_enabled: self.is_pubsub_enabled(),
            webhook_count: state.webhooks.len(),
            channel_count: state.channels.len(),
        }
    }

    /// Map a webhook pattern to a job. Re-registering the same pair is a
    /// no-op; a pattern already serving another job is a conflict.
    pub async fn register_webhook_trigger(&self, job_id: Uuid, pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Err(OrchestratorError::Validation(
                "webhook pattern must not be empty".to_string(),
            ));
        }
        self.repo.get(job_id).await?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.webhooks.get(pattern) {
            if *existing == job_id {
                return Ok(());
            }
            return Err(OrchestratorError::TriggerConflict {
                key: pattern.to_string(),
                existing: *existing,
            });
        }
        state.webhooks.insert(pattern.to_string(), job_id);
        info!(job_id = %job_id, pattern, "webhook trigger registered");
        Ok(())
    }

    /// Map a channel to a job and subscribe to it. Transport trouble
    /// surfaces here, at registration time.
    pub async fn register_channel_trigger(
        self: &Arc<Self>,
        job_id: Uuid,
        channel: &str,
    ) -> Result<()> {
        if channel.is_empty() {
            return Err(OrchestratorError::Validation(
                "channel name must not be empty".to_string(),
            ));
        }
        self.repo.get(job_id).await?;

        let Some(transport) = self.transport.clone() else {
            return Err(OrchestratorError::Unavailable(
                "pub/sub transport not configured".to_string(),
            ));
        };

        let mut state = self.state.write().await;
        if let Some(existing) = state.channels.get(channel) {
            if existing.job_id == job_id {
                return Ok(());
            }
            return Err(OrchestratorError::TriggerConflict {
                key: channel.to_string(),
                existing: existing.job_id,
            });
        }

        let receiver = transport.subscribe(channel).await?;
        let stop = self.shutdown.child_token();
        state.channels.insert(
            channel.to_string(),
            ChannelRegistration {
                job_id,
                stop: stop.clone(),
            },
        );

        let this = Arc::clone(self);
        let channel_name = channel.to_string();
        tokio::spawn(async move {
            this.forward_channel(channel_name, job_id, receiver, stop)
                .await;
        });

        info!(job_id = %job_id, channel, "channel trigger registered");
        Ok(())
    }

    async fn forward_channel(
        self: Arc<Self>,
        channel: String,
        job_id: Uuid,
        mut receiver: mpsc::Receiver<ChannelMessage>,
        stop: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = stop.cancelled() => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => {
                        warn!(channel, "channel subscription closed by transport");
                        break;
                    }
                },
            };

            if !self.is_running() {
                debug!(channel, "router not started, channel message ignored");
                continue;
            }

            match self.scheduler.admit(job_id, AdmissionSource::Channel).await {
                Ok(AdmissionOutcome::Started(execution)) => {
                    info!(
                        job_id = %job_id,
                        channel = %message.channel,
                        execution = execution.execution_number,
                        "channel trigger admitted job"
                    );
                }
                Ok(AdmissionOutcome::Queued) => {
                    debug!(job_id = %job_id, channel = %message.channel, "channel trigger queued job");
                }
                Err(e) => {
                    // Denials are the admission rules doing their job.
                    debug!(job_id = %job_id, channel = %message.channel, error = %e, "channel trigger denied");
                }
            }
        }
    }

    /// Route an inbound webhook call. `Ok(None)` means no registered
    /// pattern matched; that is not an error.
    pub async fn handle_webhook(
        self: &Arc<Self>,
        path: &str,
    ) -> Result<Option<AdmissionOutcome>> {
        let job_id = {
            let state = self.state.read().await;
            match state.webhooks.get(path) {
                Some(job_id) => Some(*job_id),
                None => state
                    .webhooks
                    .iter()
                    .filter(|(pattern, _)| path.starts_with(pattern.as_str()))
                    .max_by_key(|(pattern, _)| pattern.len())
                    .map(|(_, job_id)| *job_id),
            }
        };

        let Some(job_id) = job_id else {
            debug!(path, "webhook matched no registered pattern");
            return Ok(None);
        };

        let outcome = self
            .scheduler
            .admit(job_id, AdmissionSource::Webhook)
            .await?;
        Ok(Some(outcome))
    }

    /// Remove every registration for a job. Idempotent.
    pub async fn unregister_job(&self, job_id: Uuid) {
        let mut state = self.state.write().await;
        state.webhooks.retain(|_, registered| *registered != job_id);

        let channels: Vec<String> = state
            .channels
            .iter()
            .filter(|(_, registration)| registration.job_id == job_id)
            .map(|(channel, _)| channel.clone())
            .collect();
        for channel in channels {
            if let Some(registration) = state.channels.remove(&channel) {
                registration.stop.cancel();
                debug!(job_id = %job_id, channel, "channel trigger removed");
            }
        }
    }

    pub async fn registered_webhooks(&self) -> HashMap<String, Uuid> {
        self.state.read().await.webhooks.clone()
    }

    pub async fn registered_channels(&self) -> HashMap<String, Uuid> {
        self.state
            .read()
            .await
            .channels
            .iter()
            .map(|(channel, registration)| (channel.clone(), registration.job_id))
            .collect()
    }
}
