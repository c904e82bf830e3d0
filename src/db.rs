//! Database module
//!
//! Connection, schema creation and schema verification utilities.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::Config;

/// Schema statements, applied in order. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_id        UUID PRIMARY KEY,
        aggregate_id    TEXT NOT NULL,
        aggregate_type  TEXT NOT NULL,
        event_type      TEXT NOT NULL,
        event_version   INTEGER NOT NULL CHECK (event_version > 0),
        global_version  BIGINT NOT NULL CHECK (global_version > 0),
        event_data      JSONB NOT NULL,
        metadata        JSONB NULL,
        occurred_on     TIMESTAMPTZ NOT NULL,
        stored_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT events_aggregate_version_key UNIQUE (aggregate_id, event_version),
        CONSTRAINT events_global_version_key UNIQUE (global_version)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS events_aggregate_type_version_idx ON events (aggregate_type, event_version)",
    "CREATE INDEX IF NOT EXISTS events_event_type_global_version_idx ON events (event_type, global_version)",
    "CREATE INDEX IF NOT EXISTS events_occurred_on_idx ON events (occurred_on)",
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        aggregate_id    TEXT PRIMARY KEY,
        aggregate_type  TEXT NOT NULL,
        version         INTEGER NOT NULL,
        snapshot_data   JSONB NOT NULL,
        metadata        JSONB NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS snapshots_aggregate_type_version_idx ON snapshots (aggregate_type, version)",
];

/// Advisory lock key held while the schema is being created
const MIGRATION_LOCK_KEY: i64 = 0x4556_5453_4d49_4752;

/// Tables the event store needs
const REQUIRED_TABLES: &[&str] = &["events", "snapshots"];

/// Create the connection pool described by the configuration
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Create the event store tables and indexes if they do not exist.
///
/// Runs in one transaction so a half-created schema is never left behind.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Concurrent CREATE ... IF NOT EXISTS can still collide on the catalog
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!("Event store schema is up to date");
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
