//! Redis pub/sub event bus transport.

use std::sync::Arc;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::RedisConfig;
use crate::event::AvailabilityEvent;
use crate::infrastructure::ExponentialBackoff;
use crate::pipeline::EventProcessor;

use super::{AvailabilityPublisher, EventEnvelope, PublishError};

/// Outbound envelope for availability events.
#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "detail-type")]
    detail_type: String,
    detail: &'a AvailabilityEvent,
}

/// Publishes availability event batches to a Redis channel.
pub struct RedisAvailabilityPublisher {
    conn: ConnectionManager,
    channel: String,
}

impl RedisAvailabilityPublisher {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait::async_trait]
impl AvailabilityPublisher for RedisAvailabilityPublisher {
    async fn publish_batch(&self, events: &[AvailabilityEvent]) -> Result<(), PublishError> {
        let mut pipe = redis::pipe();
        for event in events {
            let envelope = OutboundEnvelope {
                detail_type: event.detail_type(),
                detail: event,
            };
            pipe.publish(&self.channel, serde_json::to_string(&envelope)?);
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// Redis pub/sub subscriber feeding the event processor.
pub struct RedisSubscriber {
    config: RedisConfig,
    processor: Arc<EventProcessor>,
    shutdown: broadcast::Sender<()>,
}

impl RedisSubscriber {
    pub fn new(config: RedisConfig, processor: Arc<EventProcessor>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            processor,
            shutdown,
        }
    }

    /// Get a shutdown signal sender
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Start the subscriber loop, reconnecting with backoff on failure.
    pub async fn start(&self) -> anyhow::Result<()> {
        let channels = &self.config.event_channels;
        if channels.is_empty() {
            tracing::info!("No event channels configured, skipping event subscriber");
            return Ok(());
        }

        tracing::info!(channels = ?channels, "Starting event subscriber");

        let mut backoff = ExponentialBackoff::new();
        loop {
            match self.run_subscription_loop(channels).await {
                Ok(()) => {
                    tracing::info!("Event subscriber stopped gracefully");
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Event subscription error, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(())
    }

    async fn run_subscription_loop(&self, channels: &[String]) -> anyhow::Result<()> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;

        for channel in channels {
            if channel.contains('*') || channel.contains('?') || channel.contains('[') {
                pubsub.psubscribe(channel).await?;
                tracing::debug!(pattern = %channel, "Subscribed to pattern");
            } else {
                pubsub.subscribe(channel).await?;
                tracing::debug!(channel = %channel, "Subscribed to channel");
            }
        }

        tracing::info!("Event subscription established");

        let mut message_stream = pubsub.on_message();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Received shutdown signal");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to get message payload");
                                    continue;
                                }
                            };
                            self.handle_message(&channel, &payload).await;
                        }
                        None => {
                            tracing::warn!("Event message stream ended");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_message(&self, channel: &str, payload: &str) {
        tracing::debug!(channel = %channel, "Received bus message");

        let envelope: EventEnvelope = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    channel = %channel,
                    payload = %payload,
                    "Failed to parse event envelope"
                );
                return;
            }
        };

        let event = envelope.into_event();
        match self.processor.process(&event).await {
            Ok(outcome) => {
                tracing::debug!(
                    event_id = %event.id,
                    matched = outcome.matched,
                    written = outcome.written.len(),
                    failed = outcome.failed.len(),
                    "Processed event"
                );
            }
            Err(e) => {
                // Surfacing here leaves redelivery to the transport
                tracing::error!(
                    event_id = %event.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Event processing failed"
                );
            }
        }
    }
}
