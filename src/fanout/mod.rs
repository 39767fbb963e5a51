//! Lazy fan-out: expand group-addressed records into per-recipient
//! availability events.
//!
//! The dispatcher consumes insert notifications from the record store's
//! change feed. No per-recipient rows are ever written; one ephemeral
//! availability event per recipient is published instead, which bounds write
//! amplification at record-creation time.

mod recipients;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::bus::{AvailabilityPublisher, PublishError};
use crate::event::AvailabilityEvent;
use crate::infrastructure::{retry_with_backoff, RetryPolicy};
use crate::metrics::{
    AVAILABILITY_FAILED_TOTAL, AVAILABILITY_PUBLISHED_TOTAL, CHANGEFEED_LAGGED_TOTAL,
    FANOUT_DISPATCHES_TOTAL, FANOUT_RECIPIENTS,
};
use crate::record::Target;
use crate::store::RecordInserted;

pub use recipients::{
    RecipientError, RecipientResolver, RedisRecipientResolver, StaticRecipientResolver, UserClient,
};

/// Fan-out dispatch error type
#[derive(Debug, Error)]
pub enum FanOutError {
    /// Recipient lookup failed after retries
    #[error("recipient resolution failed: {0}")]
    Recipients(#[from] RecipientError),

    /// Publish failed after retries
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    /// Every batch for a record failed after retries
    #[error("all availability batches failed for record {record_id}")]
    AllBatchesFailed { record_id: Uuid },
}

/// Fan-out configuration
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Maximum availability events per publish call
    pub batch_size: usize,
    /// Concurrent batch publishes per record
    pub max_concurrent_batches: usize,
    /// Retry policy for recipient resolution and batch publishes
    pub retry: RetryPolicy,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrent_batches: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one fan-out dispatch
#[derive(Debug, Clone, Serialize)]
pub struct FanOutResult {
    pub record_id: Uuid,
    /// Resolved recipient count
    pub recipients: usize,
    /// Availability events published
    pub published: usize,
    /// Availability events in batches that failed after retries
    pub failed: usize,
}

/// Statistics for the fan-out dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Insert notifications dispatched
    pub dispatched_total: AtomicU64,
    /// Availability events published
    pub published_total: AtomicU64,
    /// Availability events lost to failed batches
    pub failed_total: AtomicU64,
    /// User-addressed records skipped (already singly addressed)
    pub user_skipped_total: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            dispatched_total: self.dispatched_total.load(Ordering::Relaxed),
            published_total: self.published_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            user_skipped_total: self.user_skipped_total.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub dispatched_total: u64,
    pub published_total: u64,
    pub failed_total: u64,
    pub user_skipped_total: u64,
}

/// Expands group-addressed records into per-recipient availability events.
pub struct FanOutDispatcher {
    recipients: Arc<dyn RecipientResolver>,
    publisher: Arc<dyn AvailabilityPublisher>,
    config: FanOutConfig,
    stats: DispatcherStats,
}

impl FanOutDispatcher {
    pub fn new(
        recipients: Arc<dyn RecipientResolver>,
        publisher: Arc<dyn AvailabilityPublisher>,
        config: FanOutConfig,
    ) -> Self {
        Self {
            recipients,
            publisher,
            config,
            stats: DispatcherStats::default(),
        }
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Consume the change feed until shutdown.
    ///
    /// Lagging behind the feed drops insert notifications; that is surfaced
    /// via metrics and a warning, and downstream consumers already tolerate
    /// missed-then-redelivered signals.
    pub async fn run(
        self: Arc<Self>,
        feed: broadcast::Receiver<RecordInserted>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut stream = BroadcastStream::new(feed);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Fan-out dispatcher received shutdown signal");
                    break;
                }
                item = stream.next() => {
                    match item {
                        Some(Ok(inserted)) => {
                            if let Err(e) = self.dispatch(&inserted).await {
                                tracing::error!(
                                    record_id = %inserted.record_id,
                                    target_key = %inserted.target_key,
                                    error = %e,
                                    "Fan-out dispatch failed"
                                );
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            CHANGEFEED_LAGGED_TOTAL.inc_by(skipped);
                            tracing::warn!(skipped = skipped, "Change feed lagged, insert notifications dropped");
                        }
                        None => {
                            tracing::info!("Change feed closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Fan one inserted record out to its recipients.
    ///
    /// Emits exactly one availability event per (record, recipient) pair per
    /// dispatch attempt. Redelivered insert notifications produce duplicate
    /// events, which downstream consumers dedupe by (record_id, recipient_id).
    #[tracing::instrument(
        name = "fanout.dispatch",
        skip(self, inserted),
        fields(
            record_id = %inserted.record_id,
            target_key = %inserted.target_key,
        )
    )]
    pub async fn dispatch(&self, inserted: &RecordInserted) -> Result<FanOutResult, FanOutError> {
        let target_type = inserted.target.target_type();
        FANOUT_DISPATCHES_TOTAL
            .with_label_values(&[target_type.as_str()])
            .inc();
        self.stats.dispatched_total.fetch_add(1, Ordering::Relaxed);

        let recipient_ids: Vec<String> = match &inserted.target {
            Target::User(_) => {
                // Already singly addressed
                self.stats.user_skipped_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("User-addressed record needs no fan-out");
                return Ok(FanOutResult {
                    record_id: inserted.record_id,
                    recipients: 0,
                    published: 0,
                    failed: 0,
                });
            }
            Target::Client(client_id) => {
                retry_with_backoff(&self.config.retry, "resolve_client_users", || {
                    let resolver = self.recipients.clone();
                    let client_id = client_id.clone();
                    async move { resolver.resolve_client_users(&client_id).await }
                })
                .await?
            }
            Target::Broadcast => retry_with_backoff(&self.config.retry, "resolve_all_users", || {
                let resolver = self.recipients.clone();
                async move { resolver.resolve_all_users().await }
            })
            .await?
            .into_iter()
            .map(|uc| uc.user_id)
            .collect(),
            Target::Channel(channel_id) => {
                retry_with_backoff(&self.config.retry, "resolve_channel_participants", || {
                    let resolver = self.recipients.clone();
                    let channel_id = channel_id.clone();
                    async move { resolver.resolve_channel_participants(&channel_id).await }
                })
                .await?
            }
        };

        FANOUT_RECIPIENTS.observe(recipient_ids.len() as f64);

        if recipient_ids.is_empty() {
            tracing::debug!("No recipients resolved, nothing to publish");
            return Ok(FanOutResult {
                record_id: inserted.record_id,
                recipients: 0,
                published: 0,
                failed: 0,
            });
        }

        let emitted_at = Utc::now();
        let events: Vec<AvailabilityEvent> = recipient_ids
            .iter()
            .map(|recipient_id| AvailabilityEvent {
                recipient_id: recipient_id.clone(),
                record_id: inserted.record_id,
                target_type,
                kind: inserted.kind,
                target_key: inserted.target_key.clone(),
                emitted_at,
            })
            .collect();

        // Batches fail and retry independently; one bad batch never blocks
        // the rest
        let batches: Vec<Vec<AvailabilityEvent>> = events
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();

        let results: Vec<(usize, usize)> = futures::stream::iter(
            batches.into_iter().enumerate().map(|(index, batch)| {
                let publisher = self.publisher.clone();
                let policy = self.config.retry.clone();
                async move {
                    let size = batch.len();
                    let outcome =
                        retry_with_backoff(&policy, "publish_availability_batch", || {
                            let publisher = publisher.clone();
                            let batch = batch.clone();
                            async move { publisher.publish_batch(&batch).await }
                        })
                        .await;
                    match outcome {
                        Ok(()) => (size, 0),
                        Err(e) => {
                            tracing::warn!(
                                batch = index,
                                size = size,
                                error = %e,
                                "Availability batch failed after retries"
                            );
                            (0, size)
                        }
                    }
                }
            }),
        )
        .buffer_unordered(self.config.max_concurrent_batches.max(1))
        .collect()
        .await;

        let published: usize = results.iter().map(|(p, _)| p).sum();
        let failed: usize = results.iter().map(|(_, f)| f).sum();

        self.stats
            .published_total
            .fetch_add(published as u64, Ordering::Relaxed);
        self.stats
            .failed_total
            .fetch_add(failed as u64, Ordering::Relaxed);
        AVAILABILITY_PUBLISHED_TOTAL.inc_by(published as u64);
        AVAILABILITY_FAILED_TOTAL.inc_by(failed as u64);

        tracing::debug!(
            recipients = recipient_ids.len(),
            published = published,
            failed = failed,
            "Fanned out availability events"
        );

        if published == 0 && failed > 0 {
            return Err(FanOutError::AllBatchesFailed {
                record_id: inserted.record_id,
            });
        }

        Ok(FanOutResult {
            record_id: inserted.record_id,
            recipients: recipient_ids.len(),
            published,
            failed,
        })
    }
}
