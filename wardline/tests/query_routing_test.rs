//! End-to-end query routing over the shared store

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use wardline::classifier::{Classifier, QueryIntentResult};
use wardline::model::SearchCriteria;
use wardline::router::{Agent, AgentResponse};
use wardline::{
    Action, AppConfig, AppContext, InMemoryRecords, MemorySink, QueryContext, WardlineError,
};
use wardline_kv::keys;

struct OfflineModel;

#[async_trait]
impl Classifier for OfflineModel {
    fn name(&self) -> &str {
        "remote-model"
    }

    async fn classify(&self, _text: &str) -> wardline::Result<QueryIntentResult> {
        Err(WardlineError::Classifier("503 Service Unavailable".into()))
    }
}

async fn context() -> (AppContext, Arc<InMemoryRecords>, Arc<MemorySink>) {
    let records = Arc::new(InMemoryRecords::seeded());
    let audit = Arc::new(MemorySink::new(64));
    let ctx = AppContext::bootstrap_with(
        AppConfig::for_testing(0),
        records.clone(),
        Some(Arc::new(OfflineModel)),
        audit.clone(),
    )
    .await
    .unwrap();
    (ctx, records, audit)
}

#[tokio::test(start_paused = true)]
async fn test_search_cached_for_two_minutes() {
    let (ctx, records, _) = context().await;
    let user = QueryContext::for_subject("1");

    let first = ctx.router.route("Find diabetic patients in ICU", &user).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.agent, Agent::PatientRetrieval);

    let criteria = SearchCriteria {
        condition: Some("diabetic".into()),
        department: Some("ICU".into()),
        timeframe: None,
    };
    let key = keys::search(&criteria).unwrap();
    assert!(key.starts_with("search:"));
    assert!(ctx.store.get(&key).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(119)).await;
    let reads = records.reads();
    let second = ctx.router.route("Find diabetic patients in ICU", &user).await.unwrap();
    assert!(second.cached);
    assert_eq!(first.data, second.data);
    assert_eq!(records.reads(), reads);

    tokio::time::advance(Duration::from_secs(2)).await;
    let third = ctx.router.route("Find diabetic patients in ICU", &user).await.unwrap();
    assert!(!third.cached);
}

#[tokio::test]
async fn test_offline_model_falls_back_to_keywords() {
    let (ctx, _, audit) = context().await;

    let outcome = ctx
        .router
        .route("show vitals for John Doe", &QueryContext::for_subject("1"))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.intent.action, Action::RetrieveVitals);
    assert_eq!(outcome.intent.confidence, 0.85);

    let records = audit.records().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
}

#[tokio::test]
async fn test_every_action_dispatches() {
    let (ctx, _, _) = context().await;
    let user = QueryContext::for_subject("2");

    let cases = [
        ("show vitals for Sarah Smith", Agent::PatientRetrieval, "get_vitals"),
        ("list patients admitted today", Agent::PatientRetrieval, "search_patient"),
        ("generate shift handoff for ER", Agent::ShiftHandoff, "generate_handoff"),
        ("any emergency alerts?", Agent::EmergencyPrioritizer, "check_alerts"),
    ];
    for (query, agent, intent) in cases {
        let outcome = ctx.router.route(query, &user).await.unwrap();
        assert_eq!(outcome.agent, agent, "{}", query);
        assert_eq!(outcome.intent.intent, intent, "{}", query);
        assert!(outcome.data.is_some(), "{}", query);
    }

    let unknown = ctx.router.route("what's for lunch", &user).await.unwrap();
    assert!(unknown.data.is_none());
    match unknown.response {
        AgentResponse::Clarification { suggestions, .. } => assert!(!suggestions.is_empty()),
        other => panic!("expected clarification, got {:?}", other),
    }
}

#[tokio::test]
async fn test_records_outage_is_user_visible() {
    let (ctx, records, audit) = context().await;
    records.set_available(false);

    let err = ctx
        .router
        .route("Find diabetic patients in ICU", &QueryContext::for_subject("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, WardlineError::SystemOfRecord { .. }));

    let logged = audit.records().await;
    assert!(!logged[0].success);
}

#[tokio::test]
async fn test_store_outage_is_invisible() {
    let (ctx, _, _) = context().await;
    ctx.pool().backend().set_reachable(false);

    let outcome = ctx
        .router
        .route("show critical alerts", &QueryContext::for_subject("1"))
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(!outcome.cached);
}
