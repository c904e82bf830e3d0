//! Event Store Repository
//!
//! Core implementation of the Event Store pattern.
//! Provides atomic, globally ordered event persistence with optimistic
//! concurrency control, plus one snapshot row per aggregate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::aggregate::{self, Aggregate};
use crate::domain::NewEvent;
use crate::resilience::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    RetryError, RetryPolicy,
};

use super::{EventStoreError, EventStoreMetrics, Snapshot, StoredEvent};

/// Advisory lock key serializing every append in the store.
/// Held for the duration of the append transaction.
const APPEND_LOCK_KEY: i64 = 0x4556_5453_544f_5245;

/// Rows per INSERT statement (9 bind parameters each, Postgres allows 65535)
const INSERT_CHUNK_SIZE: usize = 1000;

/// Resilience settings for write operations
#[derive(Debug, Clone, Default)]
pub struct EventStoreConfig {
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
}

/// Event Store for persisting and retrieving events
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    metrics: Arc<EventStoreMetrics>,
}

impl EventStore {
    /// Create a new EventStore with a database pool
    pub fn new(pool: PgPool, config: EventStoreConfig, metrics: Arc<EventStoreMetrics>) -> Self {
        Self {
            pool,
            retry: config.retry,
            breaker: CircuitBreaker::new(config.circuit),
            metrics,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn metrics(&self) -> &EventStoreMetrics {
        &self.metrics
    }

    /// Current state of the write circuit breaker
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    // =========================================================================
    // Appending events
    // =========================================================================

    /// Append events to an aggregate.
    ///
    /// When `expected_version` is given, the append only succeeds if the
    /// aggregate is currently at exactly that version. Conflicts are returned
    /// immediately; transient database failures are retried.
    #[tracing::instrument(
        skip_all,
        fields(aggregate_id = %aggregate_id, aggregate_type = %aggregate_type, events_len = events.len())
    )]
    pub async fn append_events(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        events: Vec<NewEvent>,
        expected_version: Option<i32>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend(aggregate_id.to_string()));
        }

        let stored = self
            .guarded_write("append_events", |attempt| {
                self.try_append_events(aggregate_id, aggregate_type, &events, expected_version, attempt)
            })
            .await
            .map_err(|err| match err {
                WriteFailure::Database { attempts, source } => EventStoreError::Append {
                    aggregate_id: aggregate_id.to_string(),
                    attempts,
                    source,
                },
                WriteFailure::Other(err) => err,
            })?;

        self.metrics
            .events_appended
            .with_label_values(&[aggregate_type])
            .inc_by(stored.len() as u64);

        tracing::debug!(
            first_version = stored.first().map(|e| e.event_version),
            last_version = stored.last().map(|e| e.event_version),
            "Events appended"
        );

        Ok(stored)
    }

    /// Try to append events (single attempt, single transaction)
    async fn try_append_events(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        events: &[NewEvent],
        expected_version: Option<i32>,
        attempt: u32,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if attempt > 1 {
            self.metrics.retries.with_label_values(&["append_events"]).inc();
        }

        let mut tx = self.pool.begin().await?;

        // Serialize against every other append so MAX()+1 below is linearizable
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        // Verify expected version (optimistic locking)
        let current_version = Self::current_version_in(&mut tx, aggregate_id).await?;

        if let Some(expected) = expected_version {
            if current_version != expected {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: aggregate_id.to_string(),
                    expected,
                    actual: current_version,
                });
            }
        }

        let next_global_version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(global_version), 0) + 1 FROM events")
                .fetch_one(&mut *tx)
                .await?;

        let mut stored = Vec::with_capacity(events.len());

        for (chunk_index, chunk) in events.chunks(INSERT_CHUNK_SIZE).enumerate() {
            let offset = chunk_index * INSERT_CHUNK_SIZE;

            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO events (event_id, aggregate_id, aggregate_type, event_type, \
                 event_version, global_version, event_data, metadata, occurred_on) ",
            );
            qb.push_values(chunk.iter().enumerate(), |mut b, (index, event)| {
                let position = offset + index;
                b.push_bind(Uuid::new_v4())
                    .push_bind(aggregate_id.to_string())
                    .push_bind(aggregate_type.to_string())
                    .push_bind(event.event_type.clone())
                    .push_bind(current_version + position as i32 + 1)
                    .push_bind(next_global_version + position as i64)
                    .push_bind(event.event_data.clone())
                    .push_bind(event.metadata.clone())
                    .push_bind(event.occurred_on);
            });
            qb.push(
                " RETURNING event_id, aggregate_id, aggregate_type, event_type, event_version, \
                 global_version, event_data, metadata, occurred_on, stored_at",
            );

            let rows: Vec<StoredEvent> = qb.build_query_as().fetch_all(&mut *tx).await?;
            stored.extend(rows);
        }

        // Commit transaction
        tx.commit().await?;

        stored.sort_by_key(|event| event.global_version);
        Ok(stored)
    }

    /// Get current version of an aggregate inside a transaction
    async fn current_version_in(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<i32, EventStoreError> {
        let result: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT MAX(event_version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(result.unwrap_or(0))
    }

    /// Get current version of an aggregate (0 when it has no events)
    pub async fn current_version(&self, aggregate_id: &str) -> Result<i32, EventStoreError> {
        let result: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT MAX(event_version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| EventStoreError::Get {
            operation: "read aggregate version",
            source,
        })?;

        Ok(result.unwrap_or(0))
    }

    // =========================================================================
    // Reading events
    // =========================================================================

    /// Events of one aggregate with `event_version > from_version`, ascending
    #[tracing::instrument(skip(self))]
    pub async fn get_events_for_aggregate(
        &self,
        aggregate_id: &str,
        from_version: Option<i32>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
                   global_version, event_data, metadata, occurred_on, stored_at
            FROM events
            WHERE aggregate_id = $1 AND event_version > $2
            ORDER BY event_version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(from_version.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|source| EventStoreError::Get {
            operation: "load events for aggregate",
            source,
        })
    }

    /// Events of one type with `global_version > from_version`, in global order
    #[tracing::instrument(skip(self))]
    pub async fn get_events_by_type(
        &self,
        event_type: &str,
        from_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
                   global_version, event_data, metadata, occurred_on, stored_at
            FROM events
            WHERE event_type = $1 AND global_version > $2
            ORDER BY global_version ASC
            "#,
        )
        .bind(event_type)
        .bind(from_version.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|source| EventStoreError::Get {
            operation: "load events by type",
            source,
        })
    }

    /// All events in global order; `from_version` exclusive, `to_version` inclusive
    #[tracing::instrument(skip(self))]
    pub async fn get_all_events(
        &self,
        from_version: Option<i64>,
        to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
                   global_version, event_data, metadata, occurred_on, stored_at
            FROM events
            WHERE global_version > $1
              AND ($2::BIGINT IS NULL OR global_version <= $2)
            ORDER BY global_version ASC
            "#,
        )
        .bind(from_version.unwrap_or(0))
        .bind(to_version)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| EventStoreError::Get {
            operation: "load all events",
            source,
        })
    }

    /// Events of several aggregates in one query.
    /// Every requested id is present in the result, possibly with no events.
    #[tracing::instrument(skip_all, fields(aggregates = aggregate_ids.len()))]
    pub async fn get_events_for_aggregates(
        &self,
        aggregate_ids: &[String],
    ) -> Result<HashMap<String, Vec<StoredEvent>>, EventStoreError> {
        let mut by_aggregate: HashMap<String, Vec<StoredEvent>> = aggregate_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        if aggregate_ids.is_empty() {
            return Ok(by_aggregate);
        }

        let events = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
                   global_version, event_data, metadata, occurred_on, stored_at
            FROM events
            WHERE aggregate_id = ANY($1)
            ORDER BY aggregate_id ASC, event_version ASC
            "#,
        )
        .bind(aggregate_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| EventStoreError::Get {
            operation: "load events for aggregates",
            source,
        })?;

        for event in events {
            by_aggregate
                .entry(event.aggregate_id.clone())
                .or_default()
                .push(event);
        }

        Ok(by_aggregate)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Save the snapshot of an aggregate, replacing the previous one.
    ///
    /// Returns `false` when a snapshot with a higher version is already
    /// stored; that snapshot is kept.
    #[tracing::instrument(skip(self, snapshot_data, metadata))]
    pub async fn save_snapshot(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        snapshot_data: serde_json::Value,
        version: i32,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool, EventStoreError> {
        let saved = self
            .guarded_write("save_snapshot", |attempt| {
                self.try_save_snapshot(
                    aggregate_id,
                    aggregate_type,
                    &snapshot_data,
                    version,
                    metadata.as_ref(),
                    attempt,
                )
            })
            .await
            .map_err(|err| match err {
                WriteFailure::Database { attempts, source } => EventStoreError::Snapshot {
                    aggregate_id: aggregate_id.to_string(),
                    attempts,
                    source,
                },
                WriteFailure::Other(err) => err,
            })?;

        if saved {
            tracing::info!(
                "Snapshot saved for {} aggregate {} at version {}",
                aggregate_type,
                aggregate_id,
                version
            );
        } else {
            tracing::debug!("Stale snapshot for aggregate {} ignored", aggregate_id);
        }

        Ok(saved)
    }

    async fn try_save_snapshot(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        snapshot_data: &serde_json::Value,
        version: i32,
        metadata: Option<&serde_json::Value>,
        attempt: u32,
    ) -> Result<bool, EventStoreError> {
        if attempt > 1 {
            self.metrics.retries.with_label_values(&["save_snapshot"]).inc();
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, snapshot_data, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET aggregate_type = EXCLUDED.aggregate_type,
                          version = EXCLUDED.version,
                          snapshot_data = EXCLUDED.snapshot_data,
                          metadata = EXCLUDED.metadata,
                          updated_at = NOW()
            WHERE snapshots.version <= EXCLUDED.version
            "#,
        )
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(version)
        .bind(snapshot_data)
        .bind(metadata)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load the snapshot of an aggregate, if one was saved
    #[tracing::instrument(skip(self))]
    pub async fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>, EventStoreError> {
        sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT aggregate_id, aggregate_type, version, snapshot_data, metadata, created_at, updated_at
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| EventStoreError::Get {
            operation: "load snapshot",
            source,
        })
    }

    // =========================================================================
    // Rehydration
    // =========================================================================

    /// Load an aggregate by replaying events (with snapshot optimization)
    pub async fn load_aggregate<A: Aggregate>(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<A>, EventStoreError> {
        // 1. Try to load from snapshot
        let snapshot = self.get_snapshot(aggregate_id).await?;
        let from_version = snapshot.as_ref().map(|s| s.version);

        // 2. Load events after snapshot version
        let events = self.get_events_for_aggregate(aggregate_id, from_version).await?;

        // 3. Replay events on initial state
        Ok(aggregate::replay(snapshot.as_ref(), &events)?)
    }

    /// Save a snapshot if the aggregate version warrants it
    pub async fn save_aggregate_snapshot<A: Aggregate>(
        &self,
        aggregate: &A,
    ) -> Result<bool, EventStoreError> {
        if !aggregate.should_snapshot() {
            return Ok(false);
        }

        self.save_snapshot(
            aggregate.aggregate_id(),
            A::aggregate_type(),
            aggregate.to_snapshot(),
            aggregate.version(),
            None,
        )
        .await
    }

    // =========================================================================
    // Breaker + retry wrapping
    // =========================================================================

    /// Run a write through the circuit breaker and the retry policy.
    ///
    /// Only failures that reach the database count against the breaker and
    /// only transient ones are retried.
    async fn guarded_write<F, Fut, T>(
        &self,
        operation: &'static str,
        attempt_fn: F,
    ) -> Result<T, WriteFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, EventStoreError>>,
    {
        let retried = async {
            retry_with_backoff(&self.retry, EventStoreError::is_transient, attempt_fn).await
        };

        let result = self
            .breaker
            .call_filtered(retried, |err: &RetryError<EventStoreError>| match err {
                RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => {
                    error.is_infrastructure()
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open) => {
                self.metrics.circuit_rejections.inc();
                tracing::warn!(operation, "Circuit breaker open, rejecting write");
                Err(WriteFailure::Other(EventStoreError::CircuitOpen))
            }
            Err(CircuitBreakerError::OperationFailed(retry_err)) => {
                let attempts = retry_err.attempts();
                match retry_err.into_inner() {
                    EventStoreError::Database(source) => {
                        self.metrics.failures.with_label_values(&[operation]).inc();
                        tracing::error!(operation, attempts, error = %source, "Write failed");
                        Err(WriteFailure::Database { attempts, source })
                    }
                    other => Err(WriteFailure::Other(other)),
                }
            }
        }
    }
}

/// Outcome of a failed guarded write before operation context is attached
enum WriteFailure {
    Database { attempts: u32, source: sqlx::Error },
    Other(EventStoreError),
}
