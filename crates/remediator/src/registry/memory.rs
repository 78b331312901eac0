//! In-process registry for single-instance deployments.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{new_request, RegistryError, RemediationRegistry};
use crate::dedup::IntakeGuard;
use crate::types::{IncidentContext, PlanOrigin, RemediationRequest, RequestId, RequestStatus};

/// Registry backed by a process-local map.
///
/// Only correct when exactly one orchestrator instance serves callbacks.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    pending: Arc<RwLock<HashMap<RequestId, RemediationRequest>>>,
    deliveries: IntakeGuard,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemediationRegistry for InMemoryRegistry {
    async fn create(
        &self,
        incident_key: &str,
        commands: Vec<String>,
        origin: PlanOrigin,
        context: IncidentContext,
    ) -> Result<RequestId, RegistryError> {
        let request = new_request(incident_key, commands, origin, context)?;
        let request_id = request.request_id.clone();

        let mut pending = self.pending.write().await;
        pending.insert(request_id.clone(), request);

        debug!(request_id = %request_id, incident = %incident_key, "Registered pending request");
        Ok(request_id)
    }

    async fn consume(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RemediationRequest>, RegistryError> {
        // remove() under the write lock is the atomic read-and-delete
        let taken = self.pending.write().await.remove(request_id);
        Ok(taken)
    }

    async fn expire(&self, max_age: Duration) -> Result<Vec<RemediationRequest>, RegistryError> {
        let now = Utc::now();
        let mut pending = self.pending.write().await;

        let stale: Vec<RequestId> = pending
            .values()
            .filter(|r| r.is_older_than(max_age, now))
            .map(|r| r.request_id.clone())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(mut request) = pending.remove(&id) {
                request.status = RequestStatus::Expired;
                expired.push(request);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired pending requests");
        }
        Ok(expired)
    }

    async fn pending_count(&self) -> Result<usize, RegistryError> {
        Ok(self.pending.read().await.len())
    }

    async fn claim_delivery(
        &self,
        delivery_key: &str,
        window: Duration,
    ) -> Result<bool, RegistryError> {
        Ok(self.deliveries.claim(delivery_key, window).await)
    }

    async fn release_delivery(&self, delivery_key: &str) -> Result<(), RegistryError> {
        self.deliveries.release(delivery_key).await;
        Ok(())
    }
}
