//! Application state
//!
//! Everything the service shares between requests is built here at startup
//! and dropped at shutdown. Handlers receive it as axum state.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use wardline_kv::{EventBus, SessionStore, StoreClient, StorePool, Subscription};

use crate::api::auth::JwtAuth;
use crate::api::rate_limit::RateLimits;
use crate::classifier::{Classifier, FallbackClassifier, KeywordClassifier};
use crate::config::AppConfig;
use crate::error::Result;
use crate::gateway::RealtimeGateway;
use crate::records::{Directory, InMemoryRecords, RecordSource};
use crate::repository::CacheAsideRepository;
use crate::router::{InteractionSink, QueryRouter, TracingSink};

pub struct AppContext {
    pub config: AppConfig,
    pub store: StoreClient,
    /// Publish handle; the gateway subscribes through its own
    pub bus: EventBus,
    pub sessions: SessionStore,
    pub directory: Arc<dyn Directory>,
    pub repository: Arc<CacheAsideRepository>,
    pub router: QueryRouter,
    pub gateway: Arc<RealtimeGateway>,
    pub jwt: JwtAuth,
    pub rate_limits: RateLimits,
    subscriptions: Mutex<Vec<Subscription>>,
    pool: StorePool,
}

impl AppContext {
    /// Seeded records, keyword classification, audit to the log
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        Self::bootstrap_with(
            config,
            Arc::new(InMemoryRecords::seeded()),
            None,
            Arc::new(TracingSink),
        )
        .await
    }

    /// Build the context over the given collaborators
    ///
    /// A `primary` classifier is guarded by the configured timeout and falls
    /// back to keyword classification.
    pub async fn bootstrap_with<R>(
        config: AppConfig,
        records: Arc<R>,
        primary: Option<Arc<dyn Classifier>>,
        audit: Arc<dyn InteractionSink>,
    ) -> Result<Self>
    where
        R: RecordSource + Directory + 'static,
    {
        let pool = StorePool::in_memory(config.store.clone())?;
        let store = pool.client();

        let repository = Arc::new(CacheAsideRepository::new(
            store.clone(),
            records.clone(),
            records.clone(),
            config.ttls,
            config.records_timeout,
        ));

        let classifier: Arc<dyn Classifier> = match primary {
            Some(primary) => Arc::new(FallbackClassifier::new(primary, config.classifier_timeout)),
            None => Arc::new(KeywordClassifier),
        };
        info!(classifier = classifier.name(), "Classifier ready");
        let router = QueryRouter::new(classifier, repository.clone(), audit);

        let gateway = Arc::new(RealtimeGateway::new());
        let subscriptions = gateway.attach(&pool.event_bus()).await?;

        if config.uses_default_secret() {
            warn!("JWT_SECRET not set, using the built-in development secret");
        }

        Ok(Self {
            bus: pool.event_bus(),
            sessions: pool.sessions(config.ttls.session),
            directory: records,
            repository,
            router,
            gateway,
            jwt: JwtAuth::new(&config.jwt_secret, config.token_ttl_hours),
            rate_limits: RateLimits::new(config.rate_limit_max, config.rate_limit_window),
            subscriptions: Mutex::new(subscriptions),
            store,
            pool,
            config,
        })
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    /// Detach the gateway from the bus
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for sub in subscriptions.drain(..) {
            sub.unsubscribe();
        }
        info!("Application context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ALERTS_TOPIC;
    use crate::model::{AlertEvent, Severity};

    #[tokio::test]
    async fn test_bootstrap_attaches_gateway() {
        let ctx = AppContext::bootstrap(AppConfig::for_testing(0)).await.unwrap();
        assert_eq!(ctx.pool().backend().subscriber_count(ALERTS_TOPIC).await, 1);

        let (_id, mut rx) = ctx.gateway.connect();
        let alert = AlertEvent::new(Severity::Critical, "Code blue", "Room 4");
        assert_eq!(ctx.bus.publish(ALERTS_TOPIC, &alert).await.unwrap(), 1);
        assert!(rx.recv().await.is_some());

        ctx.shutdown().await;
        tokio::task::yield_now().await;
        let alert = AlertEvent::new(Severity::Critical, "Code blue", "Room 5");
        ctx.bus.publish(ALERTS_TOPIC, &alert).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(ctx.gateway.broadcasts(), 1);
    }
}
