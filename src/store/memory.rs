//! In-memory record store backend.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::record::Record;

use super::{RecordStore, StoreError};

/// DashMap-backed record store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRecordStore {
    by_id: DashMap<Uuid, Record>,
    partitions: DashMap<String, Vec<Uuid>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &Record) -> Result<bool, StoreError> {
        match self.by_id.entry(record.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                self.partitions
                    .entry(record.target_key.clone())
                    .or_default()
                    .push(record.id);
                Ok(true)
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Record>, StoreError> {
        Ok(self.by_id.get(&id).map(|r| r.value().clone()))
    }

    async fn query_by_partition(&self, target_key: &str) -> Result<Vec<Record>, StoreError> {
        let ids = match self.partitions.get(target_key) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        let mut records: Vec<Record> = ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|r| r.value().clone()))
            .collect();
        records.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(records)
    }
}
