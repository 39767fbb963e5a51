//! Record store abstraction.
//!
//! The durable store is a keyed store with query-by-partition and change
//! notifications. This module defines the backend trait, an in-memory
//! implementation, a PostgreSQL implementation, and the change-feed
//! decorator that the fan-out dispatcher consumes.

mod changefeed;
mod factory;
mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::record::Record;

pub use changefeed::{ChangeFeedStore, RecordInserted};
pub use factory::create_record_store;
pub use memory::MemoryRecordStore;
pub use postgres::PostgresRecordStore;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend is temporarily unavailable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed record storage.
///
/// Records are partitioned by `target_key` and ordered by `received_at`
/// within a partition. `put` is idempotent on the record id so redelivered
/// events write duplicates, not second records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record. Returns `true` when the record was newly inserted,
    /// `false` when a record with the same id already existed.
    async fn put(&self, record: &Record) -> Result<bool, StoreError>;

    /// Look up a record by id (secondary index).
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Record>, StoreError>;

    /// All records in a partition, newest first.
    async fn query_by_partition(&self, target_key: &str) -> Result<Vec<Record>, StoreError>;
}
