//! Pending remediation requests keyed by single-use id.
//!
//! The registry owns a request while it is PENDING. `consume` is an
//! atomic read-and-delete: of any number of concurrent callers racing on
//! one id, exactly one receives the request and the rest see `None`.
//! That single property is what makes approval callbacks safe to retry.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use crate::plan::PlanError;
use crate::types::{CommandPlan, IncidentContext, PlanOrigin, RemediationRequest, RequestId};

pub use memory::InMemoryRegistry;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRegistry;

/// Registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Commands failed validation; nothing was stored
    #[error(transparent)]
    InvalidPlan(#[from] PlanError),

    /// Backing store unreachable or returned garbage
    #[error("registry store unavailable: {0}")]
    Unavailable(String),
}

/// Store of pending remediation requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemediationRegistry: Send + Sync {
    /// Validate `commands`, store a new PENDING request and return its id.
    async fn create(
        &self,
        incident_key: &str,
        commands: Vec<String>,
        origin: PlanOrigin,
        context: IncidentContext,
    ) -> Result<RequestId, RegistryError>;

    /// Atomically remove and return a PENDING request.
    async fn consume(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RemediationRequest>, RegistryError>;

    /// Remove PENDING requests older than `max_age`, returned as EXPIRED.
    async fn expire(&self, max_age: Duration) -> Result<Vec<RemediationRequest>, RegistryError>;

    /// Number of PENDING requests.
    async fn pending_count(&self) -> Result<usize, RegistryError>;

    /// Claim an alert delivery key for `window`.
    ///
    /// `Ok(false)` when another caller, in this process or any other
    /// instance sharing the store, claimed it inside the window.
    async fn claim_delivery(
        &self,
        delivery_key: &str,
        window: Duration,
    ) -> Result<bool, RegistryError>;

    /// Drop a delivery claim so a retry can proceed.
    async fn release_delivery(&self, delivery_key: &str) -> Result<(), RegistryError>;
}

/// Shared validation for backends: build the request that will be stored.
pub(crate) fn new_request(
    incident_key: &str,
    commands: Vec<String>,
    origin: PlanOrigin,
    context: IncidentContext,
) -> Result<RemediationRequest, RegistryError> {
    let plan = CommandPlan::new(commands)?;
    Ok(RemediationRequest::new(incident_key, plan, origin, context))
}
