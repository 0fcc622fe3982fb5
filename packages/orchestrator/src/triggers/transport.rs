//! Pub/sub channel transport abstraction for production and testing.
//!
//! Provides a trait-based transport that allows swapping between a real
//! NATS connection and an in-memory test double.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, Result};

/// An inbound message on a named channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: Bytes,
}

/// Trait for subscribing to named channels.
///
/// This allows swapping between real NATS and test doubles.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Subscribe to a channel. Messages arrive on the returned receiver
    /// until the subscription is dropped. Subscription failures surface
    /// here, at registration time.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelMessage>>;
}

/// Real NATS-backed channel transport.
pub struct NatsChannelTransport {
    client: async_nats::Client,
}

impl NatsChannelTransport {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelTransport for NatsChannelTransport {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelMessage>> {
        let mut subscriber = self
            .client
            .subscribe(channel.to_string())
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let forwarded = ChannelMessage {
                    channel: message.subject.to_string(),
                    payload: message.payload,
                };
                if tx.send(forwarded).await.is_err() {
                    // Receiver dropped, the registration is gone.
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// In-memory channel transport for tests.
///
/// Tests publish with [`publish`](InMemoryChannelTransport::publish) and the
/// message fans out to every live subscriber of that channel.
#[derive(Default)]
pub struct InMemoryChannelTransport {
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<ChannelMessage>>>>,
    unavailable: RwLock<bool>,
}

impl InMemoryChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent subscribe calls fail, to exercise registration-time
    /// transport errors.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self
            .unavailable
            .write()
            .unwrap_or_else(|e| e.into_inner()) = unavailable;
    }

    /// Deliver a message to every subscriber of `channel`. Returns the
    /// number of subscribers it reached.
    pub async fn publish(&self, channel: &str, payload: Bytes) -> usize {
        let senders: Vec<mpsc::Sender<ChannelMessage>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for sender in senders {
            let message = ChannelMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if sender.send(message).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl ChannelTransport for InMemoryChannelTransport {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelMessage>> {
        if *self.unavailable.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(OrchestratorError::Transport(
                "channel transport unavailable".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
