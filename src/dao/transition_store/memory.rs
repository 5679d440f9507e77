use std::{collections::BTreeMap, sync::Arc};

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dao::{models::TransitionEntity, storage::StorageResult, transition_store::TransitionStore};

/// Process-local transition store keyed by `(session_id, seq)`.
#[derive(Clone, Default)]
pub struct MemoryTransitionStore {
    records: Arc<RwLock<BTreeMap<(Uuid, u64), TransitionEntity>>>,
}

impl MemoryTransitionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored transition of `session_id` in sequence order.
    pub async fn session_log(&self, session_id: Uuid) -> Vec<TransitionEntity> {
        let guard = self.records.read().await;
        guard
            .range((session_id, 0)..=(session_id, u64::MAX))
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    /// Total number of stored transitions.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl TransitionStore for MemoryTransitionStore {
    fn record(&self, transition: TransitionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let records = self.records.clone();
        Box::pin(async move {
            let mut guard = records.write().await;
            guard
                .entry((transition.session_id, transition.seq))
                .or_insert(transition);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
