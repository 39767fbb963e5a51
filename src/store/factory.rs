//! Record store backend factory.

use std::sync::Arc;

use crate::config::StoreSettings;

use super::{MemoryRecordStore, PostgresRecordStore, RecordStore, StoreError};

/// Create a record store backend based on configuration.
///
/// - `"postgres"`: connects to `postgres_url` and bootstraps the schema
/// - `"memory"` (default): in-memory store
pub async fn create_record_store(
    settings: &StoreSettings,
) -> Result<Arc<dyn RecordStore>, StoreError> {
    match settings.backend.as_str() {
        "postgres" => match &settings.postgres_url {
            Some(url) => {
                tracing::info!(backend = "postgres", "Creating PostgreSQL record store");
                let store = PostgresRecordStore::connect(url).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!(
                    "PostgreSQL backend requested but no connection URL provided, falling back to memory"
                );
                Ok(Arc::new(MemoryRecordStore::new()))
            }
        },
        _ => {
            tracing::info!(backend = "memory", "Creating in-memory record store");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}
