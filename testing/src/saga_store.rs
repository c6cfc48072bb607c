//! In-memory saga store.

use eventum_core::saga::{SagaId, SagaLifecycle, SagaRecord, SagaStore, SagaStoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

/// [`SagaStore`] keeping instance records in a map.
#[derive(Default)]
pub struct InMemorySagaStore {
    records: RwLock<HashMap<(String, SagaId), SagaRecord>>,
}

impl InMemorySagaStore {
    /// Create an empty saga store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, across lifecycles.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl SagaStore for InMemorySagaStore {
    fn load(
        &self,
        saga_type: &str,
        saga_id: SagaId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>> {
        let key = (saga_type.to_string(), saga_id);
        Box::pin(async move { Ok(self.records.read().await.get(&key).cloned()) })
    }

    fn save(
        &self,
        record: SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let key = (record.saga_type.clone(), record.saga_id);
            self.records.write().await.insert(key, record);
            Ok(())
        })
    }

    fn remove(
        &self,
        saga_type: &str,
        saga_id: SagaId,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>> {
        let key = (saga_type.to_string(), saga_id);
        Box::pin(async move {
            self.records.write().await.remove(&key);
            Ok(())
        })
    }

    fn load_active(
        &self,
        saga_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaRecord>, SagaStoreError>> + Send + '_>> {
        let saga_type = saga_type.to_string();
        Box::pin(async move {
            Ok(self
                .records
                .read()
                .await
                .values()
                .filter(|record| {
                    record.saga_type == saga_type && record.lifecycle == SagaLifecycle::Active
                })
                .cloned()
                .collect())
        })
    }
}
