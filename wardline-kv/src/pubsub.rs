//! Typed publish/subscribe over the store
//!
//! Events are serialized to JSON text on publish and decoded per subscriber.
//! Every subscription on a topic receives every event published after it was
//! opened. A payload that fails to decode is logged and skipped; the
//! subscription keeps running.

use crate::cache::store::PubSub;
use crate::error::{Result, StoreError};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Publish/subscribe handle
#[derive(Clone)]
pub struct EventBus {
    pubsub: Arc<dyn PubSub>,
    op_timeout: Duration,
}

impl EventBus {
    pub fn new(pubsub: Arc<dyn PubSub>, op_timeout: Duration) -> Self {
        Self { pubsub, op_timeout }
    }

    /// Publish an event, returning the number of subscribers reached
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, event: &T) -> Result<usize> {
        let payload = serde_json::to_string(event)?;

        let reached = tokio::time::timeout(self.op_timeout, self.pubsub.publish(topic, payload))
            .await
            .map_err(|_| StoreError::TimeoutError {
                timeout_ms: self.op_timeout.as_millis() as u64,
                context: format!("PUBLISH {}", topic),
            })??;

        debug!(topic = topic, reached = reached, "Event published");
        Ok(reached)
    }

    /// Subscribe to a topic, invoking `handler` for each decoded event
    ///
    /// The subscription is registered before this returns, so events
    /// published afterwards are delivered.
    pub async fn subscribe<T, H>(&self, topic: &str, mut handler: H) -> Result<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
        H: FnMut(T) + Send + 'static,
    {
        let mut rx = self.pubsub.subscribe(topic).await?;

        let handled = Arc::new(AtomicU64::new(0));
        let malformed = Arc::new(AtomicU64::new(0));
        let topic_name = topic.to_string();

        let task = {
            let handled = handled.clone();
            let malformed = malformed.clone();
            let topic = topic_name.clone();

            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => match serde_json::from_str::<T>(&payload) {
                            Ok(event) => {
                                handler(event);
                                handled.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                malformed.fetch_add(1, Ordering::Relaxed);
                                error!(topic = %topic, "Dropping malformed event: {}", e);
                            }
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped = skipped, "Subscriber lagged, events skipped");
                        }
                        Err(RecvError::Closed) => {
                            info!(topic = %topic, "Topic closed, subscription ending");
                            break;
                        }
                    }
                }
            })
        };

        info!(topic = topic, "Subscribed");
        Ok(Subscription {
            topic: topic_name,
            handled,
            malformed,
            task,
        })
    }
}

/// A running subscription; dropping it unsubscribes
pub struct Subscription {
    topic: String,
    handled: Arc<AtomicU64>,
    malformed: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Events decoded and handed to the handler
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Payloads that failed to decode
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {
        debug!(topic = %self.topic, "Unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
