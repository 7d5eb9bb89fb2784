use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::WorkflowExecution;
use crate::domain::ports::errors::StoreError;

/// Abstract key-value persistence for execution snapshots
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Save (or overwrite) the snapshot for an execution
    async fn save(&self, id: Uuid, snapshot: &WorkflowExecution) -> Result<(), StoreError>;

    /// Load the latest snapshot, if any
    async fn load(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Ids of every stored execution
    async fn list(&self) -> Result<Vec<Uuid>, StoreError>;
}
