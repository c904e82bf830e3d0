//! Event Store Errors
//!
//! Error types for event store operations.

use crate::aggregate::AggregateError;
use crate::resilience::is_transient_error;

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict
    #[error("Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: String,
        expected: i32,
        actual: i32,
    },

    /// Append called without any events
    #[error("Cannot append an empty event batch to aggregate {0}")]
    EmptyAppend(String),

    /// Appending events failed after retries (or on a permanent error)
    #[error("Failed to append events to aggregate {aggregate_id} after {attempts} attempt(s): {source}")]
    Append {
        aggregate_id: String,
        attempts: u32,
        source: sqlx::Error,
    },

    /// Saving a snapshot failed after retries (or on a permanent error)
    #[error("Failed to save snapshot for aggregate {aggregate_id} after {attempts} attempt(s): {source}")]
    Snapshot {
        aggregate_id: String,
        attempts: u32,
        source: sqlx::Error,
    },

    /// A read query failed
    #[error("Failed to {operation}: {source}")]
    Get {
        operation: &'static str,
        source: sqlx::Error,
    },

    /// Writes are rejected because the database is presumed down
    #[error("Circuit breaker is open: event store writes are temporarily rejected")]
    CircuitOpen,

    /// Rebuilding an aggregate from its history failed
    #[error("Aggregate rehydration failed: {0}")]
    Aggregate(#[from] AggregateError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Check if the circuit breaker rejected the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, EventStoreError::CircuitOpen)
    }

    /// Check if this error is worth retrying.
    /// Only transient database failures qualify; conflicts never do.
    pub fn is_transient(&self) -> bool {
        self.database_error().is_some_and(is_transient_error)
    }

    /// Check if this error reflects the health of the database
    pub fn is_infrastructure(&self) -> bool {
        self.database_error().is_some()
    }

    /// The underlying database error, if any
    pub fn database_error(&self) -> Option<&sqlx::Error> {
        match self {
            EventStoreError::Database(source)
            | EventStoreError::Append { source, .. }
            | EventStoreError::Snapshot { source, .. }
            | EventStoreError::Get { source, .. } => Some(source),
            _ => None,
        }
    }
}
