//! Postgres pool and schema bootstrap.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

pub type DbPool = PgPool;

/// Create a connection pool from a database URL.
pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_history (
        id            UUID PRIMARY KEY,
        tenant_id     UUID NOT NULL,
        job_type      TEXT NOT NULL,
        payload       JSONB NOT NULL,
        priority      TEXT NOT NULL,
        priority_rank SMALLINT NOT NULL,
        status        TEXT NOT NULL,
        attempts      INTEGER NOT NULL DEFAULT 0,
        max_retries   INTEGER NOT NULL,
        sequence      BIGSERIAL NOT NULL,
        entity_type   TEXT,
        entity_id     TEXT,
        error         TEXT,
        result        JSONB,
        available_at  TIMESTAMPTZ NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL,
        started_at    TIMESTAMPTZ,
        completed_at  TIMESTAMPTZ,
        updated_at    TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS job_history_pending_idx ON job_history (priority_rank, sequence) WHERE status = 'pending'",
    "CREATE INDEX IF NOT EXISTS job_history_tenant_idx ON job_history (tenant_id, sequence DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id         UUID PRIMARY KEY,
        tenant_id  UUID NOT NULL,
        number     TEXT NOT NULL,
        status     TEXT NOT NULL,
        due_date   TIMESTAMPTZ NOT NULL,
        data       JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS invoices_due_idx ON invoices (status, due_date)",
    "CREATE UNIQUE INDEX IF NOT EXISTS invoices_number_idx ON invoices (tenant_id, number)",
    r#"
    CREATE TABLE IF NOT EXISTS automations (
        id          UUID PRIMARY KEY,
        tenant_id   UUID NOT NULL,
        name        TEXT NOT NULL,
        enabled     BOOLEAN NOT NULL DEFAULT TRUE,
        trigger     JSONB NOT NULL,
        actions     JSONB NOT NULL,
        run_count   BIGINT NOT NULL DEFAULT 0,
        last_run_at TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS automations_tenant_idx ON automations (tenant_id) WHERE enabled",
    r#"
    CREATE TABLE IF NOT EXISTS automation_executions (
        id            UUID PRIMARY KEY,
        tenant_id     UUID NOT NULL,
        automation_id UUID NOT NULL,
        trigger       TEXT NOT NULL,
        status        TEXT NOT NULL,
        event_data    JSONB NOT NULL,
        results       JSONB NOT NULL,
        started_at    TIMESTAMPTZ NOT NULL,
        completed_at  TIMESTAMPTZ NOT NULL,
        duration_ms   BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS webhook_logs (
        id          UUID PRIMARY KEY,
        tenant_id   UUID NOT NULL,
        endpoint    TEXT NOT NULL,
        method      TEXT NOT NULL,
        headers     JSONB NOT NULL,
        body        JSONB,
        response    JSONB,
        status_code INTEGER,
        success     BOOLEAN NOT NULL,
        error       TEXT,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Create any missing tables and indexes. Safe to run on every start.
pub async fn ensure_schema(pool: &DbPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "database schema ensured");
    Ok(())
}
