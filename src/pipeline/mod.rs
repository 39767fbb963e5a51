//! Event processing: match, resolve, and write records.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::PipelineError;
use crate::event::InboundEvent;
use crate::infrastructure::{retry_with_backoff, RetryPolicy};
use crate::metrics::{
    EVENTS_MATCHED_TOTAL, EVENTS_RECEIVED_TOTAL, RECORDS_FAILED_TOTAL, RECORDS_WRITTEN_TOTAL,
};
use crate::store::RecordStore;
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::template;

/// Outcome of processing one inbound event.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Matched subscription count
    pub matched: usize,
    /// Ids of records written (or already present from a prior delivery)
    pub written: Vec<Uuid>,
    /// Per-subscription failures, isolated from each other
    pub failed: Vec<(String, PipelineError)>,
}

/// Stateless per-event processor.
///
/// Holds only immutable shared state; concurrent invocations for distinct
/// events are safe.
pub struct EventProcessor {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl EventProcessor {
    pub fn new(registry: Arc<SubscriptionRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            registry,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            retry,
        }
    }

    /// Process one inbound event.
    ///
    /// Matched subscriptions are handled sequentially and fail independently.
    /// When every subscription fails and at least one cause is transient,
    /// the error propagates so the transport redelivers; all-non-retryable
    /// total failure is logged and acknowledged since redelivery would
    /// deterministically fail again.
    #[tracing::instrument(
        name = "pipeline.process",
        skip(self, event),
        fields(
            event_id = %event.id,
            source = %event.source,
            detail_type = %event.detail_type,
        )
    )]
    pub async fn process(&self, event: &InboundEvent) -> Result<ProcessOutcome, PipelineError> {
        EVENTS_RECEIVED_TOTAL.inc();

        let matches = self.registry.find_matches(event);
        if matches.is_empty() {
            tracing::debug!("No subscriptions matched");
            return Ok(ProcessOutcome {
                matched: 0,
                written: Vec::new(),
                failed: Vec::new(),
            });
        }
        EVENTS_MATCHED_TOTAL.inc();

        let matched = matches.len();
        let mut written = Vec::new();
        let mut failed: Vec<(String, PipelineError)> = Vec::new();

        for subscription in matches {
            match self.materialize(subscription, event).await {
                Ok(ids) => written.extend(ids),
                Err(e) => {
                    tracing::warn!(
                        subscription = %subscription.name,
                        error = %e,
                        "Subscription materialization failed"
                    );
                    RECORDS_FAILED_TOTAL.inc();
                    failed.push((subscription.name.clone(), e));
                }
            }
        }

        if written.is_empty() && !failed.is_empty() {
            if let Some(position) = failed.iter().position(|(_, e)| e.is_retryable()) {
                let (subscription, error) = failed.swap_remove(position);
                tracing::error!(
                    subscription = %subscription,
                    error = %error,
                    "All matched subscriptions failed; surfacing for redelivery"
                );
                return Err(error);
            }
            tracing::error!(
                failures = failed.len(),
                "All matched subscriptions failed with non-retryable errors; event will not be retried"
            );
        }

        Ok(ProcessOutcome {
            matched,
            written,
            failed,
        })
    }

    async fn materialize(
        &self,
        subscription: &Subscription,
        event: &InboundEvent,
    ) -> Result<Vec<Uuid>, PipelineError> {
        let mut ids = Vec::new();
        for (kind, tpl) in subscription.templates_for(&event.detail_type) {
            let record = template::resolve(&subscription.name, kind, tpl, event)?;

            let inserted = retry_with_backoff(&self.retry, "record_store.put", || {
                let store = self.store.clone();
                let record = record.clone();
                async move { store.put(&record).await }
            })
            .await?;

            if inserted {
                RECORDS_WRITTEN_TOTAL.with_label_values(&[kind.as_str()]).inc();
            } else {
                tracing::debug!(
                    record_id = %record.id,
                    "Record already present, treating as duplicate delivery"
                );
            }
            ids.push(record.id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeFeedStore, MemoryRecordStore};
    use crate::subscription::SubscriptionSpec;
    use serde_json::json;

    fn registry(specs: serde_json::Value) -> Arc<SubscriptionRegistry> {
        let specs: Vec<SubscriptionSpec> = serde_json::from_value(specs).unwrap();
        Arc::new(SubscriptionRegistry::load(specs).unwrap())
    }

    fn lead_registry() -> Arc<SubscriptionRegistry> {
        registry(json!([{
            "name": "lead-alerts",
            "event_pattern": {
                "sources": ["crm"],
                "detail_types": ["lead.created"]
            },
            "notifications": {
                "lead.created": {
                    "target_type": "client",
                    "client_id": "{{tenantId}}",
                    "title": "New Lead"
                }
            }
        }]))
    }

    #[tokio::test]
    async fn test_matching_event_writes_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let processor = EventProcessor::new(lead_registry(), store.clone());

        let event = InboundEvent::builder("crm", "lead.created")
            .id("evt-1")
            .payload(json!({"tenantId": "t1"}))
            .build();

        let outcome = processor.process(&event).await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.written.len(), 1);
        assert!(outcome.failed.is_empty());

        let records = store.query_by_partition("client#t1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "New Lead");
    }

    #[tokio::test]
    async fn test_non_matching_event_writes_nothing() {
        let store = Arc::new(MemoryRecordStore::new());
        let processor = EventProcessor::new(lead_registry(), store.clone());

        let event = InboundEvent::builder("crm", "lead.updated")
            .payload(json!({"tenantId": "t1"}))
            .build();

        let outcome = processor.process(&event).await.unwrap();
        assert_eq!(outcome.matched, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_event_is_duplicate_not_second_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let processor = EventProcessor::new(lead_registry(), store.clone());

        let event = InboundEvent::builder("crm", "lead.created")
            .id("evt-1")
            .payload(json!({"tenantId": "t1"}))
            .build();

        processor.process(&event).await.unwrap();
        processor.process(&event).await.unwrap();

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_subscription_is_isolated() {
        // Two subscriptions match; one has an unresolvable client id
        let registry = registry(json!([
            {
                "name": "broken",
                "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]},
                "notifications": {
                    "lead.created": {
                        "target_type": "client",
                        "client_id": "{{missingField}}",
                        "title": "t"
                    }
                }
            },
            {
                "name": "working",
                "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]},
                "notifications": {
                    "lead.created": {
                        "target_type": "client",
                        "client_id": "{{tenantId}}",
                        "title": "t"
                    }
                }
            }
        ]));
        let store = Arc::new(MemoryRecordStore::new());
        let processor = EventProcessor::new(registry, store.clone());

        let event = InboundEvent::builder("crm", "lead.created")
            .id("evt-1")
            .payload(json!({"tenantId": "t1"}))
            .build();

        let outcome = processor.process(&event).await.unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.written.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "broken");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_total_non_retryable_failure_is_acknowledged() {
        let registry = registry(json!([{
            "name": "broken",
            "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]},
            "notifications": {
                "lead.created": {
                    "target_type": "user",
                    "user_id": "{{missingField}}",
                    "title": "t"
                }
            }
        }]));
        let store = Arc::new(MemoryRecordStore::new());
        let processor = EventProcessor::new(registry, store.clone());

        let event = InboundEvent::builder("crm", "lead.created")
            .payload(json!({}))
            .build();

        // Data problem: no Err, no record
        let outcome = processor.process(&event).await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert!(outcome.written.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_notification_and_message_mappings_both_materialize() {
        let registry = registry(json!([{
            "name": "chat",
            "event_pattern": {"sources": ["chat"], "detail_types": ["chat.message"]},
            "notifications": {
                "chat.message": {
                    "target_type": "channel",
                    "channel_id": "{{channelId}}",
                    "title": "New message"
                }
            },
            "messages": {
                "chat.message": {
                    "target_type": "channel",
                    "channel_id": "{{channelId}}",
                    "title": "{{sender}}",
                    "content": "{{body}}"
                }
            }
        }]));
        let store = Arc::new(MemoryRecordStore::new());
        let processor = EventProcessor::new(registry, store.clone());

        let event = InboundEvent::builder("chat", "chat.message")
            .id("evt-5")
            .payload(json!({"channelId": "general", "sender": "kim", "body": "hello"}))
            .build();

        let outcome = processor.process(&event).await.unwrap();
        assert_eq!(outcome.written.len(), 2);
        assert_eq!(
            store.query_by_partition("channel#general").await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_insert_notifications_flow_through_changefeed() {
        let feed = Arc::new(ChangeFeedStore::new(Arc::new(MemoryRecordStore::new()), 16));
        let mut rx = feed.subscribe();
        let processor = EventProcessor::new(lead_registry(), feed.clone());

        let event = InboundEvent::builder("crm", "lead.created")
            .id("evt-1")
            .payload(json!({"tenantId": "t1"}))
            .build();
        let outcome = processor.process(&event).await.unwrap();

        let inserted = rx.recv().await.unwrap();
        assert_eq!(inserted.record_id, outcome.written[0]);
        assert_eq!(inserted.target_key, "client#t1");
    }
}
