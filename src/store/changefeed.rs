//! Change feed decorator: insert notifications for the fan-out dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::record::{Record, RecordKind, Target};

use super::{RecordStore, StoreError};

/// Insert notification emitted after a record is first written.
///
/// Carries everything the fan-out dispatcher needs so dispatch does not have
/// to read the record back.
#[derive(Debug, Clone)]
pub struct RecordInserted {
    pub record_id: Uuid,
    pub target: Target,
    pub kind: RecordKind,
    pub target_key: String,
}

impl From<&Record> for RecordInserted {
    fn from(record: &Record) -> Self {
        Self {
            record_id: record.id,
            target: record.target.clone(),
            kind: record.kind,
            target_key: record.target_key.clone(),
        }
    }
}

/// Wraps any backend and broadcasts `RecordInserted` after each first insert.
///
/// Duplicate writes (same id) do not notify; at-least-once delivery of the
/// notifications themselves is still possible and tolerated downstream.
pub struct ChangeFeedStore {
    inner: Arc<dyn RecordStore>,
    tx: broadcast::Sender<RecordInserted>,
}

impl ChangeFeedStore {
    pub fn new(inner: Arc<dyn RecordStore>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { inner, tx }
    }

    /// Subscribe to insert notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordInserted> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl RecordStore for ChangeFeedStore {
    async fn put(&self, record: &Record) -> Result<bool, StoreError> {
        let inserted = self.inner.put(record).await?;
        if inserted {
            // No receivers is fine; the feed is best-effort within-process
            let _ = self.tx.send(RecordInserted::from(record));
        }
        Ok(inserted)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Record>, StoreError> {
        self.inner.get_by_id(id).await
    }

    async fn query_by_partition(&self, target_key: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.query_by_partition(target_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Priority;
    use crate::store::MemoryRecordStore;
    use chrono::Utc;

    fn record(id: u128) -> Record {
        let now = Utc::now();
        let target = Target::Client("t1".into());
        Record {
            id: Uuid::from_u128(id),
            target_key: target.partition_key(),
            target,
            kind: RecordKind::Notification,
            title: "t".to_string(),
            content: String::new(),
            priority: Priority::Normal,
            metadata: serde_json::Map::new(),
            icon: None,
            category: None,
            action_url: None,
            tags: Vec::new(),
            display_duration: None,
            sound: None,
            created_at: now,
            received_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_notifies() {
        let store = ChangeFeedStore::new(Arc::new(MemoryRecordStore::new()), 16);
        let mut rx = store.subscribe();

        store.put(&record(1)).await.unwrap();

        let inserted = rx.recv().await.unwrap();
        assert_eq!(inserted.record_id, Uuid::from_u128(1));
        assert_eq!(inserted.target_key, "client#t1");
    }

    #[tokio::test]
    async fn test_duplicate_insert_does_not_notify() {
        let store = ChangeFeedStore::new(Arc::new(MemoryRecordStore::new()), 16);
        let mut rx = store.subscribe();

        store.put(&record(1)).await.unwrap();
        store.put(&record(1)).await.unwrap();

        rx.recv().await.unwrap();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_put_without_subscribers_succeeds() {
        let store = ChangeFeedStore::new(Arc::new(MemoryRecordStore::new()), 16);
        assert!(store.put(&record(1)).await.unwrap());
    }
}
