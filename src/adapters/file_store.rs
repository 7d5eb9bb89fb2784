//! JSON file execution store: one `<id>.json` file per execution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::WorkflowExecution;
use crate::domain::ports::{ExecutionStore, StoreError};

#[derive(Debug, Clone)]
pub struct JsonFileExecutionStore {
    dir: PathBuf,
}

impl JsonFileExecutionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl ExecutionStore for JsonFileExecutionStore {
    async fn save(&self, id: Uuid, snapshot: &WorkflowExecution) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(snapshot)?;

        // Write to a sibling temp file, then rename over the old snapshot.
        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        debug!(execution_id = %id, path = %path.display(), "execution snapshot saved");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        let path = self.path_for(id);
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                id: id.to_string(),
                reason: err.to_string(),
            })
    }

    async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(Uuid::parse_str)
            {
                Some(Ok(id)) => ids.push(id),
                _ => warn!(path = %path.display(), "ignoring unrecognised file in execution store"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
