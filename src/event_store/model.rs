//! Stored records
//!
//! Rows read back from the `events` and `snapshots` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored event from the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    /// Position within the aggregate, gapless from 1
    pub event_version: i32,
    /// Position across the whole store
    pub global_version: i64,
    pub event_data: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    /// Producer-supplied time of the fact
    pub occurred_on: DateTime<Utc>,
    /// Insert time
    pub stored_at: DateTime<Utc>,
}

/// Latest materialized state of an aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Snapshot {
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Aggregate version the snapshot represents
    pub version: i32,
    pub snapshot_data: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
