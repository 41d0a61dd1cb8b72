//! End-to-end publish → fan-out → deliver coverage: one registry, real
//! subscriptions, real channels, no mocks beyond the `AllowAll`
//! collaborator stub.

use std::collections::BTreeMap;
use std::time::Duration;

use realtime_core::collaborators::{AllowAll, User};
use realtime_core::event::{Event, EventType};
use realtime_core::query::Query;
use realtime_core::registry::{Delivery, SubscriptionOptions};
use realtime_core::store::memory::InMemoryEventStore;
use realtime_core::value::{FieldMap, FieldValue};
use realtime_core::{Config, Registry};
use std::sync::Arc;

fn test_registry() -> Registry {
    let config = Config::default();
    let store = Arc::new(InMemoryEventStore::new(config.event_retention_count, config.event_retention_duration));
    Registry::new(config, store, Arc::new(AllowAll))
}

fn user() -> User {
    User {
        user_id: "u1".to_string(),
        tenant_id: "t1".to_string(),
    }
}

fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
    FieldMap(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<BTreeMap<_, _>>())
}

#[tokio::test]
async fn subscriber_receives_matching_events_and_not_others() {
    let registry = test_registry();
    let path = "projects/p/databases/d/documents/rooms/1".to_string();

    let (_resp, mut rx) = registry
        .subscribe(&user(), "sub1".into(), "s1".into(), path.clone(), None, None, SubscriptionOptions::default())
        .await
        .unwrap();

    registry
        .publish(Event::new_unsequenced(
            EventType::Added,
            path.clone(),
            "p",
            "d",
            "rooms/1",
            fields(&[("name", FieldValue::String("lobby".into()))]),
            None,
        ))
        .await;

    registry
        .publish(Event::new_unsequenced(
            EventType::Added,
            "projects/p/databases/d/documents/rooms/2",
            "p",
            "d",
            "rooms/2",
            fields(&[("name", FieldValue::String("other".into()))]),
            None,
        ))
        .await;

    let delivery = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match delivery {
        Delivery::Event(event) => assert_eq!(event.full_path, path),
        other => panic!("expected a document event, got {:?}", other),
    }

    // the second publish was for a different path, so nothing else should
    // ever arrive on this subscriber's channel
    let second = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(second.is_err(), "unexpected second delivery: {:?}", second);
}

#[tokio::test]
async fn query_filters_out_non_matching_documents_on_the_same_path() {
    let registry = test_registry();
    let path = "projects/p/databases/d/documents/rooms/1".to_string();
    let query = Query::from_json(
        path.clone(),
        &serde_json::json!({"filters": [{"fieldPath": "status", "operator": "==", "value": "open"}]}),
    )
    .unwrap();

    let (_resp, mut rx) = registry
        .subscribe(&user(), "sub1".into(), "s1".into(), path.clone(), Some(query), None, SubscriptionOptions::default())
        .await
        .unwrap();

    registry
        .publish(Event::new_unsequenced(
            EventType::Added,
            path.clone(),
            "p",
            "d",
            "rooms/1",
            fields(&[("status", FieldValue::String("closed".into()))]),
            None,
        ))
        .await;

    registry
        .publish(Event::new_unsequenced(
            EventType::Modified,
            path.clone(),
            "p",
            "d",
            "rooms/1",
            fields(&[("status", FieldValue::String("open".into()))]),
            None,
        ))
        .await;

    let delivery = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match delivery {
        Delivery::Event(event) => assert_eq!(event.event_type, EventType::Modified),
        other => panic!("expected the matching Modified event, got {:?}", other),
    }
}

#[tokio::test]
async fn unsubscribe_stops_further_delivery() {
    let registry = test_registry();
    let path = "projects/p/databases/d/documents/rooms/1".to_string();

    let (_resp, mut rx) = registry
        .subscribe(&user(), "sub1".into(), "s1".into(), path.clone(), None, None, SubscriptionOptions::default())
        .await
        .unwrap();

    registry.unsubscribe("sub1", "s1");

    registry
        .publish(Event::new_unsequenced(EventType::Added, path.clone(), "p", "d", "rooms/1", FieldMap::default(), None))
        .await;

    assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    assert_eq!(registry.get_subscriber_count(&path), 0);
}

#[tokio::test]
async fn resume_token_replays_events_since_last_seen() {
    let registry = test_registry();
    let path = "projects/p/databases/d/documents/rooms/1".to_string();

    let (_resp, mut rx) = registry
        .subscribe(&user(), "sub1".into(), "s1".into(), path.clone(), None, None, SubscriptionOptions::default())
        .await
        .unwrap();

    registry
        .publish(Event::new_unsequenced(EventType::Added, path.clone(), "p", "d", "rooms/1", fields(&[("seq", FieldValue::Int64(1))]), None))
        .await;
    registry
        .publish(Event::new_unsequenced(EventType::Modified, path.clone(), "p", "d", "rooms/1", fields(&[("seq", FieldValue::Int64(2))]), None))
        .await;

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    let first_token = match first {
        Delivery::Event(event) => event.resume_token,
        other => panic!("expected a document event, got {:?}", other),
    };

    // a fresh subscriber resuming from the first event's token should only
    // ever see the second one replayed, never the first again
    let (resp, mut rx2) = registry
        .subscribe(&user(), "sub2".into(), "s2".into(), path.clone(), None, Some(first_token), SubscriptionOptions::default())
        .await
        .unwrap();
    assert!(!resp.initial_snapshot);

    let replayed = tokio::time::timeout(Duration::from_secs(1), rx2.recv()).await.unwrap().unwrap();
    match replayed {
        Delivery::Event(event) => assert_eq!(event.event_type, EventType::Modified),
        other => panic!("expected the replayed Modified event, got {:?}", other),
    }
}

#[tokio::test]
async fn too_many_subscriptions_is_rejected() {
    let mut config = Config::default();
    config.max_subscriptions_per_session = 1;
    let store = Arc::new(InMemoryEventStore::new(config.event_retention_count, config.event_retention_duration));
    let registry = Registry::new(config, store, Arc::new(AllowAll));
    let path = "projects/p/databases/d/documents/rooms/1".to_string();

    let (_resp, _rx) = registry
        .subscribe(&user(), "sub1".into(), "s1".into(), path.clone(), None, None, SubscriptionOptions::default())
        .await
        .unwrap();

    let err = registry
        .subscribe(&user(), "sub1".into(), "s2".into(), path, None, None, SubscriptionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, realtime_core::error::SubscribeError::TooManySubscriptions(_, _)));
}
