//! In-memory execution store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::WorkflowExecution;
use crate::domain::ports::{ExecutionStore, StoreError};

/// Keeps the latest snapshot per execution in a map.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    snapshots: RwLock<HashMap<Uuid, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, id: Uuid, snapshot: &WorkflowExecution) -> Result<(), StoreError> {
        self.snapshots.write().await.insert(id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.snapshots.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids: Vec<Uuid> = self.snapshots.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}
