//! event_store Library
//!
//! Append-only PostgreSQL event store with optimistic concurrency,
//! snapshots, retry with backoff and circuit breaking.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod domain;
pub mod event_store;
pub mod logging;
pub mod resilience;

pub use aggregate::{Aggregate, AggregateError};
pub use config::{Config, ConfigError, LogFormat};
pub use domain::{DomainEvent, NewEvent, OperationContext};
pub use event_store::{
    EventStore, EventStoreConfig, EventStoreError, EventStoreMetrics, Snapshot, StoredEvent,
};
