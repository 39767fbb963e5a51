//! PostgreSQL record store backend.
//!
//! Records are stored as JSONB rows keyed by their deterministic id, with a
//! (target_key, received_at) index serving partition queries.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::record::Record;

use super::{RecordStore, StoreError};

/// PostgreSQL-backed record store.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Create the records table and partition index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS beacon_records (
                id UUID PRIMARY KEY,
                target_key TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                record JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_beacon_records_partition
            ON beacon_records (target_key, received_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn put(&self, record: &Record) -> Result<bool, StoreError> {
        let body = serde_json::to_value(record)?;

        // Deterministic ids make redelivered writes conflict instead of
        // duplicating; DO NOTHING keeps the first write.
        let result = sqlx::query(
            r#"
            INSERT INTO beacon_records (id, target_key, received_at, record)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.target_key)
        .bind(record.received_at)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT record FROM beacon_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: serde_json::Value = row.try_get("record")?;
                Ok(Some(serde_json::from_value(body)?))
            }
            None => Ok(None),
        }
    }

    async fn query_by_partition(&self, target_key: &str) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM beacon_records
            WHERE target_key = $1
            ORDER BY received_at DESC
            "#,
        )
        .bind(target_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.try_get("record")?;
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }
}
