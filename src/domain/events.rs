//! Domain Events
//!
//! Events handed to the event store by producers.
//! Each event type encodes itself explicitly; the store never inspects
//! payload structure.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::OperationContext;

/// A domain event that knows its own type tag and wire encoding
pub trait DomainEvent {
    /// Stable type tag stored in `event_type`
    fn event_type(&self) -> &'static str;

    /// When the fact happened, according to the producer
    fn occurred_on(&self) -> DateTime<Utc>;

    /// Encode the payload stored in `event_data`
    fn encode(&self) -> Map<String, Value>;
}

/// An event that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    pub event_data: Value,
    pub metadata: Option<Value>,
    pub occurred_on: DateTime<Utc>,
}

impl NewEvent {
    /// Create an event that occurred now
    pub fn new(event_type: impl Into<String>, event_data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            event_data,
            metadata: None,
            occurred_on: Utc::now(),
        }
    }

    /// Build from a domain event using its explicit encoding
    pub fn from_domain<E: DomainEvent + ?Sized>(event: &E) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            event_data: Value::Object(event.encode()),
            metadata: None,
            occurred_on: event.occurred_on(),
        }
    }

    pub fn occurred_on(mut self, occurred_on: DateTime<Utc>) -> Self {
        self.occurred_on = occurred_on;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach correlation data from an operation context
    pub fn with_context(mut self, context: &OperationContext) -> Self {
        self.metadata = context.to_metadata();
        self
    }
}
