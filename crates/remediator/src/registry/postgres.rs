//! `PostgreSQL` registry for multi-instance deployments.
//!
//! Consume and expiry are single `DELETE ... RETURNING` statements, so
//! the database row lock decides the one winner across processes.
//! Delivery claims use the primary key of `remediation_deliveries` the
//! same way.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, error, info};

use super::{new_request, RegistryError, RemediationRegistry};
use crate::types::{
    CommandPlan, IncidentContext, PlanOrigin, RemediationRequest, RequestId, RequestStatus,
};

const CREATE_TABLE_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS remediation_requests (
        request_id   TEXT PRIMARY KEY,
        incident_key TEXT NOT NULL,
        origin       TEXT NOT NULL,
        commands     JSONB NOT NULL,
        context      JSONB NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL
    )
";

const CREATE_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_remediation_requests_created_at \
     ON remediation_requests (created_at)";

const CREATE_DELIVERIES_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS remediation_deliveries (
        delivery_key TEXT PRIMARY KEY,
        claimed_at   TIMESTAMPTZ NOT NULL
    )
";

/// Registry backed by a `PostgreSQL` table of pending requests.
#[derive(Debug, Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Connect and make sure the tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(unavailable)?;

        let registry = Self::from_pool(pool).await?;
        info!("Registry using PostgreSQL");
        Ok(registry)
    }

    /// Use an existing pool.
    pub async fn from_pool(pool: PgPool) -> Result<Self, RegistryError> {
        let registry = Self { pool };
        registry.ensure_schema().await?;
        Ok(registry)
    }

    /// Create the tables if missing.
    pub async fn ensure_schema(&self) -> Result<(), RegistryError> {
        for statement in [CREATE_TABLE_SQL, CREATE_INDEX_SQL, CREATE_DELIVERIES_SQL] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        }
        Ok(())
    }
}

fn unavailable(e: sqlx::Error) -> RegistryError {
    RegistryError::Unavailable(e.to_string())
}

fn parse_origin(raw: &str) -> Result<PlanOrigin, RegistryError> {
    match raw {
        "vetted" => Ok(PlanOrigin::Vetted),
        "ai_suggested" => Ok(PlanOrigin::AiSuggested),
        other => Err(RegistryError::Unavailable(format!(
            "unknown plan origin in store: {other}"
        ))),
    }
}

/// One `remediation_requests` row as stored.
///
/// JSON columns stay untyped here so a row written by another version
/// still loads; [`StoredRequest::into_request`] does the validation.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredRequest {
    request_id: String,
    incident_key: String,
    origin: String,
    commands: Json<serde_json::Value>,
    context: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl StoredRequest {
    fn into_request(self) -> Result<RemediationRequest, RegistryError> {
        let request_id = RequestId::parse(&self.request_id).ok_or_else(|| {
            RegistryError::Unavailable(format!("malformed id in store: {}", self.request_id))
        })?;
        let commands: Vec<String> = serde_json::from_value(self.commands.0).map_err(|e| {
            RegistryError::Unavailable(format!("unreadable commands in store: {e}"))
        })?;
        let context: IncidentContext = serde_json::from_value(self.context.0).map_err(|e| {
            RegistryError::Unavailable(format!("unreadable context in store: {e}"))
        })?;

        Ok(RemediationRequest::restore(
            request_id,
            self.incident_key,
            parse_origin(&self.origin)?,
            CommandPlan::new(commands)?,
            self.created_at,
            context,
        ))
    }
}

/// Turn deleted rows into EXPIRED requests. A row that no longer decodes
/// is logged with its id and incident and the rest still come back.
fn collect_expired(rows: Vec<StoredRequest>) -> Vec<RemediationRequest> {
    let mut expired = Vec::with_capacity(rows.len());
    for row in rows {
        let request_id = row.request_id.clone();
        let incident_key = row.incident_key.clone();
        match row.into_request() {
            Ok(mut request) => {
                request.status = RequestStatus::Expired;
                expired.push(request);
            }
            Err(e) => error!(
                request_id = %request_id,
                incident = %incident_key,
                error = %e,
                "Expired request could not be decoded, no expiry notice will be sent"
            ),
        }
    }
    expired
}

#[async_trait]
impl RemediationRegistry for PostgresRegistry {
    async fn create(
        &self,
        incident_key: &str,
        commands: Vec<String>,
        origin: PlanOrigin,
        context: IncidentContext,
    ) -> Result<RequestId, RegistryError> {
        let request = new_request(incident_key, commands, origin, context)?;

        sqlx::query(
            "INSERT INTO remediation_requests
                (request_id, incident_key, origin, commands, context, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(request.request_id.as_str())
        .bind(&request.incident_key)
        .bind(request.origin.as_str())
        .bind(Json(request.commands()))
        .bind(Json(&request.context))
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        debug!(
            request_id = %request.request_id,
            incident = %incident_key,
            "Registered pending request"
        );
        Ok(request.request_id)
    }

    async fn consume(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RemediationRequest>, RegistryError> {
        let row: Option<StoredRequest> = sqlx::query_as(
            "DELETE FROM remediation_requests WHERE request_id = $1
             RETURNING request_id, incident_key, origin, commands, context, created_at",
        )
        .bind(request_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(StoredRequest::into_request).transpose()
    }

    async fn expire(&self, max_age: Duration) -> Result<Vec<RemediationRequest>, RegistryError> {
        let cutoff = Utc::now() - max_age;
        let rows: Vec<StoredRequest> = sqlx::query_as(
            "DELETE FROM remediation_requests WHERE created_at < $1
             RETURNING request_id, incident_key, origin, commands, context, created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let removed = rows.len();
        let expired = collect_expired(rows);
        if removed > 0 {
            info!(count = expired.len(), removed, "Expired pending requests");
        }
        Ok(expired)
    }

    async fn pending_count(&self) -> Result<usize, RegistryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM remediation_requests")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn claim_delivery(
        &self,
        delivery_key: &str,
        window: Duration,
    ) -> Result<bool, RegistryError> {
        let now = Utc::now();
        sqlx::query("DELETE FROM remediation_deliveries WHERE claimed_at < $1")
            .bind(now - window)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        // The primary key picks one winner across instances
        let inserted = sqlx::query(
            "INSERT INTO remediation_deliveries (delivery_key, claimed_at) VALUES ($1, $2)
             ON CONFLICT (delivery_key) DO NOTHING",
        )
        .bind(delivery_key)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?
        .rows_affected();

        if inserted == 0 {
            debug!(key = %delivery_key, "Delivery already claimed");
        }
        Ok(inserted == 1)
    }

    async fn release_delivery(&self, delivery_key: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM remediation_deliveries WHERE delivery_key = $1")
            .bind(delivery_key)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(origin: &str, commands: serde_json::Value) -> StoredRequest {
        StoredRequest {
            request_id: RequestId::generate().as_str().to_string(),
            incident_key: "disk-full".to_string(),
            origin: origin.to_string(),
            commands: Json(commands),
            context: Json(json!({"severity": "critical", "description": "root at 98%"})),
            created_at: Utc::now() - Duration::hours(2),
        }
    }

    #[test]
    fn test_parse_origin() {
        assert_eq!(parse_origin("vetted").unwrap(), PlanOrigin::Vetted);
        assert_eq!(parse_origin("ai_suggested").unwrap(), PlanOrigin::AiSuggested);
        assert!(parse_origin("manual").is_err());
    }

    #[test]
    fn test_stored_row_decodes() {
        let row = stored("ai_suggested", json!(["df -h", "sudo journalctl --vacuum-size=200M"]));
        let raw_id = row.request_id.clone();

        let request = row.into_request().unwrap();
        assert_eq!(request.request_id.as_str(), raw_id);
        assert_eq!(request.origin, PlanOrigin::AiSuggested);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.commands(), ["df -h", "sudo journalctl --vacuum-size=200M"]);
        assert_eq!(request.context.severity.as_deref(), Some("critical"));
    }

    #[test]
    fn test_stored_row_rejects_corruption() {
        assert!(stored("manual", json!(["df -h"])).into_request().is_err());
        assert!(stored("vetted", json!([])).into_request().is_err());
        assert!(stored("vetted", json!("df -h")).into_request().is_err());

        let mut bad_id = stored("vetted", json!(["df -h"]));
        bad_id.request_id = "not-an-id".to_string();
        assert!(bad_id.into_request().is_err());
    }

    #[test]
    fn test_collect_expired_keeps_good_rows_after_bad_one() {
        let good_a = stored("vetted", json!(["echo a"]));
        let good_b = stored("ai_suggested", json!(["echo b"]));
        let ids = [good_a.request_id.clone(), good_b.request_id.clone()];
        let rows = vec![good_a, stored("manual", json!(["echo x"])), good_b];

        let expired = collect_expired(rows);
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().all(|r| r.status == RequestStatus::Expired));
        assert_eq!(expired[0].request_id.as_str(), ids[0]);
        assert_eq!(expired[1].request_id.as_str(), ids[1]);
    }

    // The tests below need a database: DATABASE_URL=postgres://... cargo test
    // --features postgres -- --ignored

    async fn registry(pool: PgPool) -> PostgresRegistry {
        PostgresRegistry::from_pool(pool).await.unwrap()
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL"]
    async fn test_consume_is_single_use(pool: PgPool) {
        let registry = registry(pool).await;
        let id = registry
            .create(
                "disk-full",
                vec!["df -h".to_string()],
                PlanOrigin::Vetted,
                IncidentContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(registry.pending_count().await.unwrap(), 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry.consume(&id).await.unwrap().is_some()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.pending_count().await.unwrap(), 0);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL"]
    async fn test_expire_survives_corrupt_row(pool: PgPool) {
        let registry = registry(pool.clone()).await;
        let good = registry
            .create(
                "disk-full",
                vec!["df -h".to_string()],
                PlanOrigin::Vetted,
                IncidentContext::default(),
            )
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO remediation_requests
                (request_id, incident_key, origin, commands, context, created_at)
             VALUES ($1, 'cpu-high', 'manual', '[\"top\"]', '{}', $2)",
        )
        .bind(RequestId::generate().as_str())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("UPDATE remediation_requests SET created_at = created_at - interval '2 hours'")
            .execute(&pool)
            .await
            .unwrap();

        let expired = registry.expire(Duration::hours(1)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].request_id, good);
        assert_eq!(registry.pending_count().await.unwrap(), 0);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "needs DATABASE_URL"]
    async fn test_delivery_claim_is_shared_across_instances(pool: PgPool) {
        let first = registry(pool.clone()).await;
        let second = registry(pool).await;
        let window = Duration::minutes(30);

        assert!(first.claim_delivery("disk-full:fp-1", window).await.unwrap());
        assert!(!second.claim_delivery("disk-full:fp-1", window).await.unwrap());

        second.release_delivery("disk-full:fp-1").await.unwrap();
        assert!(first.claim_delivery("disk-full:fp-1", window).await.unwrap());
    }
}
