//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use event_store::resilience::{CircuitBreakerConfig, RetryPolicy};
use event_store::{db, EventStore, EventStoreConfig, EventStoreMetrics};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to the test database and make sure the schema exists.
///
/// Database tests are `#[ignore]`d; run them with `cargo test -- --ignored`.
/// Tests share the database and never truncate it, so every test uses its
/// own aggregate ids and event types.
pub async fn setup_test_store() -> EventStore {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::migrate(&pool).await.expect("Failed to create schema");

    let config = EventStoreConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        circuit: CircuitBreakerConfig::default(),
    };

    let metrics = Arc::new(EventStoreMetrics::new().expect("Failed to create metrics"));
    EventStore::new(pool, config, metrics)
}

/// Aggregate id unique to one test run
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Number of stored rows for an aggregate
pub async fn count_events(pool: &PgPool, aggregate_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE aggregate_id = $1")
        .bind(aggregate_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count events")
}
