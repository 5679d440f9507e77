mod memory;

pub use memory::MemoryTransitionStore;

use futures::future::BoxFuture;

use crate::dao::{models::TransitionEntity, storage::StorageResult};

/// Abstraction over the persistence collaborator that durably records session transitions.
///
/// `record` must be idempotent on `(session_id, seq)`: retried deliveries may repeat.
pub trait TransitionStore: Send + Sync {
    fn record(&self, transition: TransitionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
