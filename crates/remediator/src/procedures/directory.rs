//! Procedures stored as `{dir}/{incident}.json` on local disk.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{is_safe_key, ProcedureRepository, RepositoryError};
use crate::plan::Procedure;

#[derive(Debug, Clone)]
pub struct DirectoryProcedureRepository {
    root: PathBuf,
}

impl DirectoryProcedureRepository {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, incident_key: &str) -> PathBuf {
        self.root.join(format!("{incident_key}.json"))
    }
}

#[async_trait]
impl ProcedureRepository for DirectoryProcedureRepository {
    async fn lookup(&self, incident_key: &str) -> Result<Option<Procedure>, RepositoryError> {
        if !is_safe_key(incident_key) {
            debug!(incident = %incident_key, "Unsafe incident key, treating as no procedure");
            return Ok(None);
        }

        let path = self.path_for(incident_key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Procedure::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Unavailable(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, incident_key: &str, procedure: &Procedure) -> Result<(), RepositoryError> {
        if !is_safe_key(incident_key) {
            return Err(RepositoryError::InvalidKey(incident_key.to_string()));
        }

        let body = serde_json::to_vec_pretty(&procedure.to_document())
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        let path = self.path_for(incident_key);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| {
                RepositoryError::Unavailable(format!("failed to write {}: {e}", path.display()))
            })?;

        info!(incident = %incident_key, path = %path.display(), "Saved procedure");
        Ok(())
    }
}
