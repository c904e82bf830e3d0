//! Aggregate module
//!
//! Rebuilding aggregate state from a snapshot plus the events stored after it.

use crate::event_store::{Snapshot, StoredEvent};

/// Errors raised while replaying an aggregate's history
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: String,
        source: serde_json::Error,
    },

    #[error("Unknown event type for {aggregate_type}: {event_type}")]
    UnknownEventType {
        aggregate_type: &'static str,
        event_type: String,
    },

    #[error("Event history has a gap: expected version {expected}, found {found}")]
    VersionGap { expected: i32, found: i32 },
}

/// Aggregate trait that all rehydratable aggregates must implement
pub trait Aggregate: Sized + Default {
    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn aggregate_id(&self) -> &str;

    /// Get the current version (event_version of the last applied event)
    fn version(&self) -> i32;

    /// Apply a stored event, decoding its payload by event type
    fn apply(self, event: &StoredEvent) -> Result<Self, AggregateError>;

    /// Restore state from a snapshot payload
    fn from_snapshot(snapshot: &Snapshot) -> Result<Self, AggregateError>;

    /// Encode state as a snapshot payload
    fn to_snapshot(&self) -> serde_json::Value;

    /// Check if a snapshot should be created
    fn should_snapshot(&self) -> bool {
        const SNAPSHOT_INTERVAL: i32 = 100;
        self.version() > 0 && self.version() % SNAPSHOT_INTERVAL == 0
    }
}

/// Replay events on top of an optional snapshot.
///
/// `events` must be the aggregate's events after the snapshot version, in
/// ascending order. Returns `None` when there is neither a snapshot nor any
/// event.
pub fn replay<A: Aggregate>(
    snapshot: Option<&Snapshot>,
    events: &[StoredEvent],
) -> Result<Option<A>, AggregateError> {
    if snapshot.is_none() && events.is_empty() {
        return Ok(None);
    }

    let (mut aggregate, mut version) = match snapshot {
        Some(snapshot) => (A::from_snapshot(snapshot)?, snapshot.version),
        None => (A::default(), 0),
    };

    for event in events {
        if event.event_version != version + 1 {
            return Err(AggregateError::VersionGap {
                expected: version + 1,
                found: event.event_version,
            });
        }
        aggregate = aggregate.apply(event)?;
        version = event.event_version;
    }

    Ok(Some(aggregate))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    /// Minimal order aggregate used by the replay tests
    #[derive(Debug, Default, PartialEq)]
    pub struct Order {
        pub id: String,
        pub total: i64,
        pub version: i32,
    }

    impl Aggregate for Order {
        fn aggregate_type() -> &'static str {
            "Order"
        }

        fn aggregate_id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> i32 {
            self.version
        }

        fn apply(mut self, event: &StoredEvent) -> Result<Self, AggregateError> {
            match event.event_type.as_str() {
                "OrderPlaced" => self.id = event.aggregate_id.clone(),
                "ItemAdded" => {
                    self.total += event.event_data["price"].as_i64().unwrap_or_default();
                }
                other => {
                    return Err(AggregateError::UnknownEventType {
                        aggregate_type: Self::aggregate_type(),
                        event_type: other.to_string(),
                    })
                }
            }
            self.version = event.event_version;
            Ok(self)
        }

        fn from_snapshot(snapshot: &Snapshot) -> Result<Self, AggregateError> {
            let total = snapshot.snapshot_data["total"].as_i64().ok_or_else(|| {
                AggregateError::Decode {
                    what: "order snapshot".to_string(),
                    source: <serde_json::Error as serde::de::Error>::missing_field("total"),
                }
            })?;
            Ok(Self {
                id: snapshot.aggregate_id.clone(),
                total,
                version: snapshot.version,
            })
        }

        fn to_snapshot(&self) -> serde_json::Value {
            json!({ "total": self.total })
        }
    }

    pub fn stored(aggregate_id: &str, event_type: &str, version: i32, data: serde_json::Value) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: "Order".to_string(),
            event_type: event_type.to_string(),
            event_version: version,
            global_version: i64::from(version),
            event_data: data,
            metadata: None,
            occurred_on: Utc::now(),
            stored_at: Utc::now(),
        }
    }

    fn snapshot(version: i32, total: i64) -> Snapshot {
        Snapshot {
            aggregate_id: "A".to_string(),
            aggregate_type: "Order".to_string(),
            version,
            snapshot_data: json!({ "total": total }),
            metadata: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_replay_without_history_is_none() {
        let order: Option<Order> = replay(None, &[]).unwrap();
        assert!(order.is_none());
    }

    #[test]
    fn test_replay_from_events() {
        let events = vec![
            stored("A", "OrderPlaced", 1, json!({})),
            stored("A", "ItemAdded", 2, json!({ "price": 40 })),
            stored("A", "ItemAdded", 3, json!({ "price": 60 })),
        ];

        let order: Order = replay(None, &events).unwrap().unwrap();
        assert_eq!(order.id, "A");
        assert_eq!(order.total, 100);
        assert_eq!(order.version, 3);
    }

    #[test]
    fn test_replay_from_snapshot_and_newer_events() {
        let events = vec![stored("A", "ItemAdded", 5, json!({ "price": 25 }))];

        let order: Order = replay(Some(&snapshot(4, 100)), &events).unwrap().unwrap();
        assert_eq!(order.total, 125);
        assert_eq!(order.version, 5);

        let only_snapshot: Order = replay(Some(&snapshot(4, 100)), &[]).unwrap().unwrap();
        assert_eq!(only_snapshot.version, 4);
    }

    #[test]
    fn test_replay_detects_gaps() {
        let events = vec![stored("A", "ItemAdded", 6, json!({ "price": 1 }))];

        let result = replay::<Order>(Some(&snapshot(4, 100)), &events);
        assert!(matches!(
            result,
            Err(AggregateError::VersionGap { expected: 5, found: 6 })
        ));
    }

    #[test]
    fn test_replay_rejects_unknown_event_types() {
        let events = vec![stored("A", "OrderShipped", 1, json!({}))];
        let result = replay::<Order>(None, &events);
        assert!(matches!(result, Err(AggregateError::UnknownEventType { .. })));
    }

    #[test]
    fn test_should_snapshot() {
        let mut order = Order::default();
        assert!(!order.should_snapshot());

        order.version = 100;
        assert!(order.should_snapshot());

        order.version = 99;
        assert!(!order.should_snapshot());

        order.version = 200;
        assert!(order.should_snapshot());
    }
}
