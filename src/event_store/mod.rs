//! Event Store module
//!
//! Persistence layer for Event Sourcing.
//! Handles storing and retrieving events and snapshots from PostgreSQL.

mod error;
mod metrics;
mod model;
mod repository;

pub use error::EventStoreError;
pub use metrics::EventStoreMetrics;
pub use model::{Snapshot, StoredEvent};
pub use repository::{EventStore, EventStoreConfig};
