//! Session records in the shared store
//!
//! Records are written as JSON under `session:{id}` with a fixed lifetime and
//! are readable from any process sharing the store.

use crate::cache::{invalidation::InvalidationReason, keys};
use crate::connection::StoreClient;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// An authenticated staff session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub subject_id: String,
    pub subject_email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// New record with a fresh id
    pub fn new(
        subject_id: impl Into<String>,
        subject_email: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            session_id: new_session_id(),
            subject_id: subject_id.into(),
            subject_email: subject_email.into(),
            role: role.into(),
            created_at: Utc::now(),
        }
    }
}

/// Random session id
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Session storage over a store client
#[derive(Clone)]
pub struct SessionStore {
    client: StoreClient,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(client: StoreClient, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    /// Session lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a record; overwrites any record with the same id
    pub async fn store(&self, record: &SessionRecord) -> Result<()> {
        self.client
            .set_json(&keys::session(&record.session_id), record, Some(self.ttl))
            .await?;
        info!(
            session_id = %record.session_id,
            subject_id = %record.subject_id,
            "Session stored"
        );
        Ok(())
    }

    /// Look up a live session
    pub async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let record = self.client.get_json(&keys::session(session_id)).await?;
        if record.is_none() {
            debug!(session_id = session_id, "Session not found or expired");
        }
        Ok(record)
    }

    /// Delete a session, returning whether it existed
    pub async fn revoke(&self, session_id: &str) -> Result<bool> {
        let removed = self.client.del(&[keys::session(session_id)]).await?;
        info!(
            session_id = session_id,
            existed = removed > 0,
            "Session {}",
            InvalidationReason::Revoked
        );
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::StoreConfig;
    use crate::connection::StorePool;

    #[tokio::test(start_paused = true)]
    async fn test_session_lifecycle() {
        let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
        let sessions = pool.sessions(Duration::from_secs(86_400));

        let record = SessionRecord::new("1", "alice@hospital.com", "nurse");
        sessions.store(&record).await.unwrap();

        let fetched = sessions.fetch(&record.session_id).await.unwrap();
        assert_eq!(fetched, Some(record.clone()));

        tokio::time::advance(Duration::from_secs(86_401)).await;
        assert_eq!(sessions.fetch(&record.session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoke() {
        let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
        let sessions = pool.sessions(Duration::from_secs(60));

        let record = SessionRecord::new("2", "bob@hospital.com", "nurse");
        sessions.store(&record).await.unwrap();

        assert!(sessions.revoke(&record.session_id).await.unwrap());
        assert!(!sessions.revoke(&record.session_id).await.unwrap());
        assert_eq!(sessions.fetch(&record.session_id).await.unwrap(), None);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
        assert_eq!(new_session_id().len(), 36);
    }
}
