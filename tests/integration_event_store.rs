//! Integration tests for the Event Store

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use event_store::{EventStoreError, NewEvent, OperationContext};
use serde_json::json;
use tokio::task::JoinSet;
use uuid::Uuid;

mod common;

fn order_event(event_type: &str, n: i64) -> NewEvent {
    NewEvent::new(event_type, json!({ "n": n }))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_append_versions_and_stale_expected_version() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("order");

    // 3 events without expected version -> 1, 2, 3
    let stored = store
        .append_events(
            &aggregate_id,
            "Order",
            vec![
                order_event("OrderPlaced", 1),
                order_event("ItemAdded", 2),
                order_event("ItemAdded", 3),
            ],
            None,
        )
        .await
        .unwrap();
    let versions: Vec<i32> = stored.iter().map(|e| e.event_version).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    // 1 more with expected version 3 -> 4
    let stored = store
        .append_events(&aggregate_id, "Order", vec![order_event("ItemAdded", 4)], Some(3))
        .await
        .unwrap();
    assert_eq!(stored[0].event_version, 4);

    // expected version 3 is now stale
    let result = store
        .append_events(&aggregate_id, "Order", vec![order_event("ItemAdded", 5)], Some(3))
        .await;

    match result {
        Err(EventStoreError::ConcurrencyConflict {
            aggregate_id: id,
            expected,
            actual,
        }) => {
            assert_eq!(id, aggregate_id);
            assert_eq!(expected, 3);
            assert_eq!(actual, 4);
        }
        other => panic!("expected concurrency conflict, got {:?}", other),
    }

    assert_eq!(common::count_events(store.pool(), &aggregate_id).await, 4);
    assert_eq!(store.current_version(&aggregate_id).await.unwrap(), 4);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_sequential_appends_are_gapless() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("counter");

    for n in 0..5 {
        store
            .append_events(&aggregate_id, "Counter", vec![order_event("Incremented", n)], None)
            .await
            .unwrap();
    }

    let events = store.get_events_for_aggregate(&aggregate_id, None).await.unwrap();
    let versions: Vec<i32> = events.iter().map(|e| e.event_version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);

    // Global versions follow append order
    assert!(events.windows(2).all(|w| w[0].global_version < w[1].global_version));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expected_version_on_new_aggregate() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("fresh");

    let result = store
        .append_events(&aggregate_id, "Order", vec![order_event("OrderPlaced", 1)], Some(1))
        .await;
    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { expected: 1, actual: 0, .. })
    ));
    assert_eq!(common::count_events(store.pool(), &aggregate_id).await, 0);

    // Expecting version 0 creates the aggregate
    let stored = store
        .append_events(&aggregate_id, "Order", vec![order_event("OrderPlaced", 1)], Some(0))
        .await
        .unwrap();
    assert_eq!(stored[0].event_version, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_appends_get_distinct_global_versions() {
    let store = common::setup_test_store().await;

    let mut tasks = JoinSet::new();
    for n in 0..20 {
        let store = store.clone();
        let aggregate_id = common::unique_id(&format!("concurrent-{}", n));
        tasks.spawn(async move {
            let events = (0..5).map(|i| order_event("Tick", i)).collect();
            store.append_events(&aggregate_id, "Ticker", events, None).await
        });
    }

    let mut global_versions = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let stored = joined.unwrap().unwrap();
        assert_eq!(stored.len(), 5);

        // One batch occupies a contiguous block of global versions
        for pair in stored.windows(2) {
            assert_eq!(pair[1].global_version, pair[0].global_version + 1);
        }
        for event in stored {
            assert!(global_versions.insert(event.global_version), "duplicate global version");
        }
    }

    assert_eq!(global_versions.len(), 100);
    assert_eq!(store.metrics().events_appended.with_label_values(&["Ticker"]).get(), 100);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_writers_with_same_expected_version() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("contended");

    store
        .append_events(&aggregate_id, "Order", vec![order_event("OrderPlaced", 0)], None)
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for n in 0..8 {
        let store = store.clone();
        let aggregate_id = aggregate_id.clone();
        tasks.spawn(async move {
            store
                .append_events(&aggregate_id, "Order", vec![order_event("ItemAdded", n)], Some(1))
                .await
        });
    }

    let mut successes = 0;
    let mut conflicts = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => successes += 1,
            Err(e) if e.is_concurrency_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(common::count_events(store.pool(), &aggregate_id).await, 2);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_get_events_for_aggregate_from_version() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("ranged");

    let events = (1..=6).map(|n| order_event("Step", n)).collect();
    store.append_events(&aggregate_id, "Order", events, None).await.unwrap();

    let after_four = store.get_events_for_aggregate(&aggregate_id, Some(4)).await.unwrap();
    let versions: Vec<i32> = after_four.iter().map(|e| e.event_version).collect();
    assert_eq!(versions, vec![5, 6]);

    let none_after = store.get_events_for_aggregate(&aggregate_id, Some(6)).await.unwrap();
    assert!(none_after.is_empty());

    let missing = store
        .get_events_for_aggregate(&common::unique_id("missing"), None)
        .await
        .unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_get_events_by_type_in_global_order() {
    let store = common::setup_test_store().await;
    let event_type = format!("Shipped-{}", Uuid::new_v4());
    let first = common::unique_id("ship-a");
    let second = common::unique_id("ship-b");

    let a = store
        .append_events(&first, "Order", vec![order_event(&event_type, 1)], None)
        .await
        .unwrap();
    store
        .append_events(&second, "Order", vec![order_event("Other", 0)], None)
        .await
        .unwrap();
    let b = store
        .append_events(&second, "Order", vec![order_event(&event_type, 2)], None)
        .await
        .unwrap();

    let shipped = store.get_events_by_type(&event_type, None).await.unwrap();
    let ids: Vec<&str> = shipped.iter().map(|e| e.aggregate_id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    assert!(shipped[0].global_version < shipped[1].global_version);

    let after_first = store
        .get_events_by_type(&event_type, Some(a[0].global_version))
        .await
        .unwrap();
    assert_eq!(after_first.len(), 1);
    assert_eq!(after_first[0].global_version, b[0].global_version);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_get_all_events_bounds() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("bounded");

    let events = (1..=5).map(|n| order_event("Step", n)).collect();
    let stored = store.append_events(&aggregate_id, "Order", events, None).await.unwrap();
    let g: Vec<i64> = stored.iter().map(|e| e.global_version).collect();

    // from is exclusive, to is inclusive
    let window = store.get_all_events(Some(g[0]), Some(g[3])).await.unwrap();
    let versions: Vec<i64> = window.iter().map(|e| e.global_version).collect();
    assert_eq!(versions, vec![g[1], g[2], g[3]]);

    let tail = store.get_all_events(Some(g[3]), None).await.unwrap();
    assert!(tail.iter().any(|e| e.global_version == g[4]));
    assert!(tail.iter().all(|e| e.global_version > g[3]));
    assert!(tail.windows(2).all(|w| w[0].global_version < w[1].global_version));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_get_events_for_aggregates_batch() {
    let store = common::setup_test_store().await;
    let first = common::unique_id("batch-a");
    let second = common::unique_id("batch-b");
    let missing = common::unique_id("batch-missing");

    store
        .append_events(&first, "Order", vec![order_event("A", 1), order_event("A", 2)], None)
        .await
        .unwrap();
    store
        .append_events(&second, "Order", vec![order_event("B", 1)], None)
        .await
        .unwrap();

    let ids = vec![first.clone(), second.clone(), missing.clone()];
    let by_aggregate = store.get_events_for_aggregates(&ids).await.unwrap();

    assert_eq!(by_aggregate.len(), 3);
    let first_versions: Vec<i32> = by_aggregate[&first].iter().map(|e| e.event_version).collect();
    assert_eq!(first_versions, vec![1, 2]);
    assert_eq!(by_aggregate[&second].len(), 1);
    assert!(by_aggregate[&missing].is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_event_fields_round_trip() {
    let store = common::setup_test_store().await;
    let aggregate_id = common::unique_id("fields");
    let occurred_on = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
    let correlation_id = Uuid::new_v4();

    let event = NewEvent::new("OrderPlaced", json!({ "total": 100, "items": ["a", "b"] }))
        .occurred_on(occurred_on)
        .with_context(&OperationContext::new().with_correlation_id(correlation_id));

    store
        .append_events(&aggregate_id, "Order", vec![event], None)
        .await
        .unwrap();

    let events = store.get_events_for_aggregate(&aggregate_id, None).await.unwrap();
    let stored = &events[0];
    assert_eq!(stored.aggregate_type, "Order");
    assert_eq!(stored.event_type, "OrderPlaced");
    assert_eq!(stored.event_data, json!({ "total": 100, "items": ["a", "b"] }));
    assert_eq!(stored.metadata, Some(json!({ "correlation_id": correlation_id })));
    assert_eq!(stored.occurred_on, occurred_on);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_empty_append_is_rejected() {
    let store = common::setup_test_store().await;

    let result = store.append_events("nothing", "Order", vec![], None).await;
    assert!(matches!(result, Err(EventStoreError::EmptyAppend(_))));
}
