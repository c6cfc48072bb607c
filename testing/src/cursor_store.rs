//! In-memory cursor store for tracking processors.

use eventum_core::publisher::{CursorStore, CursorStoreError};
use eventum_core::stream::GlobalPosition;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

/// [`CursorStore`] keeping positions in a map.
#[derive(Default)]
pub struct InMemoryCursorStore {
    positions: RwLock<HashMap<String, GlobalPosition>>,
}

impl InMemoryCursorStore {
    /// Create an empty cursor store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn load(
        &self,
        processor: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GlobalPosition>, CursorStoreError>> + Send + '_>>
    {
        let processor = processor.to_string();
        Box::pin(async move { Ok(self.positions.read().await.get(&processor).copied()) })
    }

    fn save(
        &self,
        processor: &str,
        position: GlobalPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), CursorStoreError>> + Send + '_>> {
        let processor = processor.to_string();
        Box::pin(async move {
            self.positions.write().await.insert(processor, position);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = InMemoryCursorStore::new();
        assert_eq!(store.load("p").await.unwrap_or_default(), None);

        store
            .save("p", GlobalPosition::new(7))
            .await
            .unwrap_or_default();
        assert_eq!(
            store.load("p").await.unwrap_or_default(),
            Some(GlobalPosition::new(7))
        );
    }
}
