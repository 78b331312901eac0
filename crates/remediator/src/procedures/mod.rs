//! Vetted procedure (SOP) storage.

pub mod directory;
pub mod github;

use async_trait::async_trait;
use thiserror::Error;

use crate::plan::{PlanError, Procedure};

pub use directory::DirectoryProcedureRepository;
pub use github::GitHubProcedureRepository;

/// Procedure repository failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Store reachable but the stored document is not a usable plan
    #[error("stored procedure is invalid: {0}")]
    InvalidDocument(#[from] PlanError),

    /// Store not configured, unreachable or answered with an error
    #[error("procedure store unavailable: {0}")]
    Unavailable(String),

    /// Key cannot name a procedure
    #[error("invalid incident key: {0}")]
    InvalidKey(String),
}

/// Lookup (and optional save) of vetted procedures by incident key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcedureRepository: Send + Sync {
    /// Find the procedure for `incident_key`. `Ok(None)` means no SOP exists.
    async fn lookup(&self, incident_key: &str) -> Result<Option<Procedure>, RepositoryError>;

    /// Create or replace the procedure for `incident_key`.
    async fn save(&self, incident_key: &str, procedure: &Procedure) -> Result<(), RepositoryError>;
}

/// Incident keys become file names and URL path segments. Only
/// `[A-Za-z0-9._-]` is accepted and `..` never is.
#[must_use]
pub fn is_safe_key(incident_key: &str) -> bool {
    !incident_key.is_empty()
        && !incident_key.contains("..")
        && incident_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
