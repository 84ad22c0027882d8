use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating the queue tables if they do not exist.
///
/// Creates the status enum, `ai_requests`, `ai_responses` and
/// `ai_request_log` in the configured schema. Every statement is idempotent.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let schema = &config.schema;
    let status_type = config.status_type();
    let requests = config.requests_table();
    let responses = config.responses_table();
    let log = config.log_table();

    let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {schema}");

    // CREATE TYPE has no IF NOT EXISTS form.
    let create_status_type = format!(
        "DO $$ BEGIN
            CREATE TYPE {status_type} AS ENUM ('pending', 'processing', 'completed', 'failed', 'timeout');
        EXCEPTION
            WHEN duplicate_object THEN NULL;
        END $$"
    );

    let create_requests = format!(
        "CREATE TABLE IF NOT EXISTS {requests} (
            id           BIGSERIAL PRIMARY KEY,
            request_type TEXT NOT NULL,
            endpoint     TEXT NOT NULL,
            request_data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            source_key   TEXT NOT NULL DEFAULT '',
            priority     INTEGER NOT NULL DEFAULT 5,
            status       {status_type} NOT NULL DEFAULT 'pending',
            created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at   TIMESTAMPTZ NOT NULL DEFAULT NOW() + INTERVAL '30 seconds',
            processed_at TIMESTAMPTZ
        )"
    );

    let create_responses = format!(
        "CREATE TABLE IF NOT EXISTS {responses} (
            request_id         BIGINT PRIMARY KEY REFERENCES {requests} (id) ON DELETE CASCADE,
            response_data      JSONB NOT NULL,
            error_message      TEXT,
            processing_time_ms BIGINT NOT NULL,
            created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    );

    let create_log = format!(
        "CREATE TABLE IF NOT EXISTS {log} (
            id         BIGSERIAL PRIMARY KEY,
            request_id BIGINT NOT NULL REFERENCES {requests} (id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            event_data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            timestamp  TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    );

    let indexes = [
        // Serves the claim query's filter and ORDER BY.
        format!(
            "CREATE INDEX IF NOT EXISTS ai_requests_claim_idx ON {requests} (priority, created_at, id) WHERE status = 'pending'"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ai_requests_pending_expiry_idx ON {requests} (expires_at) WHERE status = 'pending'"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ai_requests_processing_idx ON {requests} (processed_at) WHERE status = 'processing'"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ai_request_log_request_idx ON {log} (request_id, timestamp)"
        ),
    ];

    sqlx::query(&create_schema).execute(pool).await?;
    sqlx::query(&create_status_type).execute(pool).await?;
    sqlx::query(&create_requests).execute(pool).await?;
    sqlx::query(&create_responses).execute(pool).await?;
    sqlx::query(&create_log).execute(pool).await?;
    for idx in &indexes {
        sqlx::query(idx).execute(pool).await?;
    }

    tracing::debug!(schema = %schema, "queue tables migrated");
    Ok(())
}
