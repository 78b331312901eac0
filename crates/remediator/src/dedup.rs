//! Intake de-duplication for retried webhook deliveries.
//!
//! Alertmanager re-sends a group until it gets a 2xx, and proxies retry
//! on timeouts. Each alert delivery key is claimed once per window so a
//! retry never raises a second approval card or a second auto-run.
//!
//! Claims live in the registry so every instance sharing a store sees
//! them. [`IntakeGuard`] is the process-local claim set behind
//! [`InMemoryRegistry`](crate::registry::InMemoryRegistry).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Process-local set of claimed delivery keys.
#[derive(Debug, Clone, Default)]
pub struct IntakeGuard {
    claims: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl IntakeGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `false` if it was already claimed inside `window`.
    pub async fn claim(&self, key: &str, window: Duration) -> bool {
        self.claim_at(key, window, Utc::now()).await
    }

    async fn claim_at(&self, key: &str, window: Duration, now: DateTime<Utc>) -> bool {
        let mut claims = self.claims.lock().await;
        claims.retain(|_, claimed_at| now - *claimed_at < window);

        if claims.contains_key(key) {
            debug!(key = %key, "Delivery already claimed");
            return false;
        }
        claims.insert(key.to_string(), now);
        true
    }

    /// Drop a claim so a retry of the same delivery can proceed.
    pub async fn release(&self, key: &str) {
        self.claims.lock().await.remove(key);
    }
}
