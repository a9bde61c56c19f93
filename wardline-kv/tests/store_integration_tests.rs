//! Integration tests for the store layer
//!
//! These tests verify behavior across independent handles to one backend:
//! - Values written by one client are visible to another
//! - TTL expiry and exact-key invalidation
//! - Session lifetime and revocation
//! - Event fan-out to every subscriber

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use wardline_kv::{
    keys, InvalidationPlan, ResourceTtls, SessionRecord, StoreConfig, StoreError, StorePool,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VitalsReading {
    patient_id: String,
    heart_rate: u32,
}

#[tokio::test]
async fn test_clients_share_one_backend() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let writer = pool.client();
    let reader = pool.client();

    let reading = VitalsReading {
        patient_id: "p1".to_string(),
        heart_rate: 78,
    };
    writer
        .set_json(&keys::vitals_latest("p1"), &reading, Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let seen: Option<VitalsReading> = reader.get_json(&keys::vitals_latest("p1")).await.unwrap();
    assert_eq!(seen, Some(reading));
}

#[tokio::test(start_paused = true)]
async fn test_resource_ttls_expire_independently() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let client = pool.client();
    let ttls = ResourceTtls::default();

    client
        .set(&keys::patient("p1"), "{}".to_string(), Some(ttls.patient))
        .await
        .unwrap();
    client
        .set(&keys::vitals_latest("p1"), "{}".to_string(), Some(ttls.vitals))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(client.get(&keys::patient("p1")).await.unwrap().is_some());
    assert!(client.get(&keys::vitals_latest("p1")).await.unwrap().is_none());

    tokio::time::advance(Duration::from_secs(240)).await;
    assert!(client.get(&keys::patient("p1")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_patient_invalidation_leaves_other_patients() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let client = pool.client();

    for id in ["p1", "p2"] {
        client.set(&keys::patient(id), "{}".to_string(), None).await.unwrap();
        client.set(&keys::vitals_latest(id), "{}".to_string(), None).await.unwrap();
    }

    let event = client.invalidate(InvalidationPlan::for_patient("p1")).await.unwrap();
    assert_eq!(event.removed, 2);

    assert!(client.get(&keys::patient("p1")).await.unwrap().is_none());
    assert!(client.get(&keys::vitals_latest("p1")).await.unwrap().is_none());
    assert!(client.get(&keys::patient("p2")).await.unwrap().is_some());
    assert!(client.get(&keys::vitals_latest("p2")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_counters_are_shared() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let a = pool.client();
    let b = pool.client();

    assert_eq!(a.incr(&keys::counter("queries_routed")).await.unwrap(), 1);
    assert_eq!(b.incr(&keys::counter("queries_routed")).await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_visible_across_handles_until_expiry() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let ttl = ResourceTtls::default().session;
    let api = pool.sessions(ttl);
    let worker = pool.sessions(ttl);

    let record = SessionRecord::new("1", "alice@hospital.com", "nurse");
    api.store(&record).await.unwrap();

    assert_eq!(
        worker.fetch(&record.session_id).await.unwrap().map(|r| r.subject_id),
        Some("1".to_string())
    );

    tokio::time::advance(Duration::from_secs(86_400)).await;
    assert_eq!(worker.fetch(&record.session_id).await.unwrap(), None);
}

#[tokio::test]
async fn test_event_reaches_every_bus_subscriber() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let publisher = pool.event_bus();

    let mut receivers = Vec::new();
    let mut subscriptions = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = pool
            .event_bus()
            .subscribe("alerts", move |r: VitalsReading| {
                let _ = tx.send(r);
            })
            .await
            .unwrap();
        receivers.push(rx);
        subscriptions.push(sub);
    }

    let reading = VitalsReading {
        patient_id: "p2".to_string(),
        heart_rate: 130,
    };
    assert_eq!(publisher.publish("alerts", &reading).await.unwrap(), 3);

    for rx in receivers.iter_mut() {
        assert_eq!(rx.recv().await.unwrap(), reading);
    }
}

#[tokio::test]
async fn test_unreachable_store_surfaces_connection_errors() {
    let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
    let client = pool.client();

    pool.backend().set_reachable(false);
    assert!(matches!(
        client.get(&keys::patient("p1")).await,
        Err(StoreError::ConnectionError(_))
    ));
    assert!(!client.health_check().await.status.is_operational());

    pool.backend().set_reachable(true);
    assert!(client.health_check().await.status.is_operational());
}
