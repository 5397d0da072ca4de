use async_trait::async_trait;
use chrono::Utc;
use permit_core::PermitRecord;
use permit_storage::{PermitStore, StorageError};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("fallback store unavailable: {0}")]
    Unavailable(String),
}

/// Durable write of the source record, keyed by permit identifier.
#[async_trait]
pub trait FallbackStore: Send + Sync {
    async fn upsert(&self, record: &PermitRecord) -> Result<(), FallbackError>;
}

/// [`FallbackStore`] over the SQLite permit store. Writes run on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteFallback {
    store: Arc<Mutex<PermitStore>>,
}

impl SqliteFallback {
    pub fn new(store: PermitStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn store(&self) -> Arc<Mutex<PermitStore>> {
        self.store.clone()
    }
}

#[async_trait]
impl FallbackStore for SqliteFallback {
    async fn upsert(&self, record: &PermitRecord) -> Result<(), FallbackError> {
        let store = self.store.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || -> Result<(), FallbackError> {
            let store = store
                .lock()
                .map_err(|_| FallbackError::Unavailable("store lock poisoned".to_string()))?;
            store.upsert_permit(&record, Utc::now())?;
            Ok(())
        })
        .await
        .map_err(|err| FallbackError::Unavailable(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_lands_in_sqlite() {
        let fallback = SqliteFallback::new(PermitStore::open_in_memory().expect("open db"));
        let record = PermitRecord::from_value(&json!({
            "id": "p-7",
            "application_number": "A-7",
            "permit_type": "demolition",
            "status": "filed",
            "filed_date": "2023-07-01",
            "description": "remove shed",
            "location": {"address": "7 Elm St", "block": "1", "lot": "2", "zipcode": "94110"}
        }))
        .expect("record");

        fallback.upsert(&record).await.expect("first upsert");
        fallback.upsert(&record).await.expect("second upsert");

        let store = fallback.store();
        let store = store.lock().expect("lock");
        assert_eq!(store.permit_count().expect("count"), 1);
        let stored = store.permit("p-7").expect("query").expect("present");
        assert_eq!(stored.record, record);
    }
}
