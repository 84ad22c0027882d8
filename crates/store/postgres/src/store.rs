use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use relay_core::{
    AuditLogEntry, NewRequest, Outcome, Request, RequestId, RequestStatus, Response,
};
use relay_store::{QueueStore, StatusCounts, StoreError};

use crate::config::PostgresConfig;
use crate::migrations;

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
pub(crate) fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, StoreError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| StoreError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(StoreError::Connection(format!("unknown ssl_mode: {other}")));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    Ok(options)
}

/// Classify a `sqlx` error: pool and I/O failures are connection problems,
/// everything else is a backend failure.
fn db_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Connection(e.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

/// PostgreSQL-backed implementation of [`QueueStore`].
///
/// Uses `sqlx::PgPool` for connection pooling. Every status change runs in
/// its own transaction together with the response and audit rows it
/// implies.
pub struct PostgresQueueStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresQueueStore {
    /// Create a new `PostgresQueueStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the queue tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a `PostgresQueueStore` from an existing pool and config.
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Columns of `ai_requests` in [`RequestRow`] order, qualified by `alias`.
    fn request_columns(alias: &str) -> String {
        format!(
            "{alias}.id, {alias}.request_type, {alias}.endpoint, {alias}.request_data, \
             {alias}.source_key, {alias}.priority, {alias}.status::text AS status, \
             {alias}.created_at, {alias}.expires_at, {alias}.processed_at"
        )
    }

    /// Insert the response and audit rows for a terminal transition.
    async fn insert_records(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        response: &Response,
        audit: &AuditLogEntry,
    ) -> Result<(), StoreError> {
        let insert_response = format!(
            "INSERT INTO {} (request_id, response_data, error_message, processing_time_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
            self.config.responses_table()
        );
        sqlx::query(&insert_response)
            .bind(response.request_id.get())
            .bind(&response.response_data)
            .bind(&response.error_message)
            .bind(response.processing_time_ms)
            .bind(response.created_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;

        let insert_audit = format!(
            "INSERT INTO {} (request_id, event_type, event_data, timestamp) VALUES ($1, $2, $3, $4)",
            self.config.log_table()
        );
        sqlx::query(&insert_audit)
            .bind(audit.request_id.get())
            .bind(&audit.event_type)
            .bind(&audit.event_data)
            .bind(audit.timestamp)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    /// Move one locked row to its terminal status and write its records.
    async fn finish(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: RequestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let update = format!(
            "UPDATE {} SET status = CAST($2 AS {}), processed_at = $3 WHERE id = $1",
            self.config.requests_table(),
            self.config.status_type()
        );
        sqlx::query(&update)
            .bind(id.get())
            .bind(outcome.status.as_str())
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;

        let (response, audit) = outcome.into_records(id, now);
        self.insert_records(tx, &response, &audit).await
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn enqueue(&self, request: NewRequest) -> Result<RequestId, StoreError> {
        let now = Utc::now();
        let priority = request.resolved_priority();
        let expires_at = request.resolved_expires_at(now);
        let query = format!(
            "INSERT INTO {} (request_type, endpoint, request_data, source_key, priority, status, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7) RETURNING id",
            self.config.requests_table()
        );

        let id: i64 = sqlx::query_scalar(&query)
            .bind(&request.request_type)
            .bind(&request.endpoint)
            .bind(&request.request_data)
            .bind(&request.source_key)
            .bind(priority)
            .bind(now)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(RequestId::new(id))
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Request>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let table = self.config.requests_table();
        let columns = Self::request_columns("r");

        // SKIP LOCKED makes concurrent claimers pass over each other's rows
        // instead of queueing behind them.
        let query = format!(
            "WITH claimable AS (
                SELECT id FROM {table}
                WHERE status = 'pending' AND expires_at > $1
                ORDER BY priority ASC, created_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table} r
            SET status = 'processing', processed_at = $1
            FROM claimable
            WHERE r.id = claimable.id
            RETURNING {columns}"
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows: Vec<RequestRow> = sqlx::query_as(&query)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        // RETURNING does not preserve the CTE's order.
        let mut claimed = rows
            .into_iter()
            .map(Request::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(Request::claim_order);
        Ok(claimed)
    }

    async fn complete(
        &self,
        id: RequestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let lock_row = format!(
            "SELECT status::text FROM {} WHERE id = $1 FOR UPDATE",
            self.config.requests_table()
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let current: Option<String> = sqlx::query_scalar(&lock_row)
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let current = current
            .ok_or(StoreError::NotFound(id))?
            .parse::<RequestStatus>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if current != RequestStatus::Processing || !current.can_transition_to(outcome.status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: outcome.status,
            });
        }

        self.finish(&mut tx, id, outcome, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, StoreError> {
        let select = format!(
            "SELECT id FROM {} WHERE status = 'pending' AND expires_at <= $1 \
             ORDER BY id FOR UPDATE SKIP LOCKED",
            self.config.requests_table()
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let ids: Vec<i64> = sqlx::query_scalar(&select)
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut reaped = Vec::with_capacity(ids.len());
        for id in ids {
            let id = RequestId::new(id);
            self.finish(&mut tx, id, Outcome::expired(), now).await?;
            reaped.push(id);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(reaped)
    }

    async fn reap_stalled(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestId>, StoreError> {
        let select = format!(
            "SELECT id, processed_at FROM {} \
             WHERE status = 'processing' AND processed_at <= $1 \
             ORDER BY id FOR UPDATE SKIP LOCKED",
            self.config.requests_table()
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(&select)
            .bind(claimed_before)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut reaped = Vec::with_capacity(rows.len());
        for (id, claimed_at) in rows {
            let id = RequestId::new(id);
            let held_ms = (now - claimed_at).num_milliseconds();
            self.finish(&mut tx, id, Outcome::stalled(held_ms), now)
                .await?;
            reaped.push(id);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(reaped)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        let query = format!(
            "SELECT {} FROM {} r WHERE r.id = $1",
            Self::request_columns("r"),
            self.config.requests_table()
        );
        let row: Option<RequestRow> = sqlx::query_as(&query)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Request::try_from).transpose()
    }

    async fn get_response(&self, id: RequestId) -> Result<Option<Response>, StoreError> {
        let query = format!(
            "SELECT request_id, response_data, error_message, processing_time_ms, created_at \
             FROM {} WHERE request_id = $1",
            self.config.responses_table()
        );
        let row: Option<ResponseRow> = sqlx::query_as(&query)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn audit_log(&self, id: RequestId) -> Result<Vec<AuditLogEntry>, StoreError> {
        let query = format!(
            "SELECT request_id, event_type, event_data, timestamp FROM {} \
             WHERE request_id = $1 ORDER BY timestamp ASC, id ASC",
            self.config.log_table()
        );
        let rows: Vec<AuditRow> = sqlx::query_as(&query)
            .bind(id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let query = format!(
            "SELECT status::text, COUNT(*) FROM {} GROUP BY status",
            self.config.requests_table()
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let status = status
                .parse::<RequestStatus>()
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Internal row type for `ai_requests`.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    request_type: String,
    endpoint: String,
    request_data: serde_json::Value,
    source_key: String,
    priority: i32,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RequestRow> for Request {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RequestStatus>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            id: RequestId::new(row.id),
            request_type: row.request_type,
            endpoint: row.endpoint,
            request_data: row.request_data,
            source_key: row.source_key,
            priority: row.priority,
            status,
            created_at: row.created_at,
            expires_at: row.expires_at,
            processed_at: row.processed_at,
        })
    }
}

/// Internal row type for `ai_responses`.
#[derive(sqlx::FromRow)]
struct ResponseRow {
    request_id: i64,
    response_data: serde_json::Value,
    error_message: Option<String>,
    processing_time_ms: i64,
    created_at: DateTime<Utc>,
}

impl From<ResponseRow> for Response {
    fn from(row: ResponseRow) -> Self {
        Self {
            request_id: RequestId::new(row.request_id),
            response_data: row.response_data,
            error_message: row.error_message,
            processing_time_ms: row.processing_time_ms,
            created_at: row.created_at,
        }
    }
}

/// Internal row type for `ai_request_log`.
#[derive(sqlx::FromRow)]
struct AuditRow {
    request_id: i64,
    event_type: String,
    event_data: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            request_id: RequestId::new(row.request_id),
            event_type: row.event_type,
            event_data: row.event_data,
            timestamp: row.timestamp,
        }
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/relay_test".to_string()),
            schema: format!("test_{}", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = PostgresQueueStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        relay_store::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let config = test_config();
        let store = PostgresQueueStore::new(config.clone())
            .await
            .expect("pool creation should succeed");
        migrations::run_migrations(&store.pool, &config)
            .await
            .expect("second migration run should succeed");
    }
}
