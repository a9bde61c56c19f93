//! Query routing
//!
//! `QueryRouter::route` classifies free text, dispatches to the matching
//! repository read and wraps the result with provenance. Every routed call
//! leaves an interaction record in the audit sink; sink failures are logged
//! and never affect the response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::classifier::{Action, Classifier, Entities, QueryIntentResult};
use crate::error::{Result, WardlineError};
use crate::model::{AlertList, Cached, HandoffReport, PatientSearchResult, VitalsLookup};
use crate::repository::{counters, CacheAsideRepository};

/// Agent credited with answering a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Agent {
    #[serde(rename = "patient_retrieval_agent")]
    PatientRetrieval,
    #[serde(rename = "shift_handoff_agent")]
    ShiftHandoff,
    #[serde(rename = "emergency_prioritizer_agent")]
    EmergencyPrioritizer,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Agent {
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::RetrieveVitals | Action::SearchPatients => Agent::PatientRetrieval,
            Action::GenerateHandoff => Agent::ShiftHandoff,
            Action::GetAlerts => Agent::EmergencyPrioritizer,
            Action::Unknown => Agent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::PatientRetrieval => "patient_retrieval_agent",
            Agent::ShiftHandoff => "shift_handoff_agent",
            Agent::EmergencyPrioritizer => "emergency_prioritizer_agent",
            Agent::Unknown => "unknown",
        }
    }
}

/// Caller identity and free-form client context
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub subject_id: String,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QueryContext {
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentSummary {
    pub intent: &'static str,
    pub action: Action,
    pub entities: Entities,
    pub confidence: f64,
}

impl From<&QueryIntentResult> for IntentSummary {
    fn from(result: &QueryIntentResult) -> Self {
        Self {
            intent: result.action.intent(),
            action: result.action,
            entities: result.entities.clone(),
            confidence: result.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentResponse {
    #[serde(rename_all = "camelCase")]
    Dispatched {
        action: Action,
        entities: Entities,
        requires_data: bool,
    },
    Clarification {
        message: String,
        suggestions: Vec<String>,
    },
}

impl AgentResponse {
    fn clarification() -> Self {
        AgentResponse::Clarification {
            message: "I'm not sure how to help with that. Could you rephrase your request?"
                .to_string(),
            suggestions: vec![
                "Show vitals for John Doe".to_string(),
                "Find diabetic patients in ICU".to_string(),
                "Show critical alerts".to_string(),
                "Generate shift handoff report".to_string(),
            ],
        }
    }
}

/// Data returned for a dispatched query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryData {
    Vitals(VitalsLookup),
    Search(PatientSearchResult),
    Handoff(HandoffReport),
    Alerts(AlertList),
}

/// Response envelope for a routed query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    pub success: bool,
    pub agent: Agent,
    pub intent: IntentSummary,
    pub response: AgentResponse,
    pub data: Option<QueryData>,
    pub cached: bool,
    pub execution_time: String,
}

/// One routed query, as written to the audit sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub subject_id: String,
    pub agent: Agent,
    pub query: String,
    pub action: Option<Action>,
    pub confidence: Option<f64>,
    pub latency_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Write-only audit log of routed queries
#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn record(&self, interaction: InteractionRecord) -> Result<()>;
}

/// Audit sink writing structured log lines
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl InteractionSink for TracingSink {
    async fn record(&self, interaction: InteractionRecord) -> Result<()> {
        info!(
            target: "wardline::audit",
            subject_id = %interaction.subject_id,
            agent = interaction.agent.as_str(),
            action = ?interaction.action,
            confidence = ?interaction.confidence,
            latency_ms = interaction.latency_ms,
            success = interaction.success,
            error = ?interaction.error_message,
            "Agent interaction"
        );
        Ok(())
    }
}

/// Audit sink keeping the most recent records in memory
pub struct MemorySink {
    capacity: usize,
    records: Mutex<VecDeque<InteractionRecord>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub async fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl InteractionSink for MemorySink {
    async fn record(&self, interaction: InteractionRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(interaction);
        Ok(())
    }
}

pub struct QueryRouter {
    classifier: Arc<dyn Classifier>,
    repository: Arc<CacheAsideRepository>,
    audit: Arc<dyn InteractionSink>,
}

impl QueryRouter {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        repository: Arc<CacheAsideRepository>,
        audit: Arc<dyn InteractionSink>,
    ) -> Self {
        Self {
            classifier,
            repository,
            audit,
        }
    }

    /// Classify, dispatch and wrap a free-text query
    pub async fn route(&self, text: &str, ctx: &QueryContext) -> Result<RouteOutcome> {
        let query = text.trim();
        if query.is_empty() {
            return Err(WardlineError::invalid("query", "Query is required"));
        }

        info!(subject_id = %ctx.subject_id, "Agent query: {:?}", query);
        let start = Instant::now();

        let outcome = self.classify_and_dispatch(query).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let interaction = match &outcome {
            Ok((intent, _)) => InteractionRecord {
                subject_id: ctx.subject_id.clone(),
                agent: Agent::for_action(intent.action),
                query: query.to_string(),
                action: Some(intent.action),
                confidence: Some(intent.confidence),
                latency_ms,
                success: true,
                error_message: None,
                recorded_at: Utc::now(),
            },
            Err(e) => InteractionRecord {
                subject_id: ctx.subject_id.clone(),
                agent: Agent::Unknown,
                query: query.to_string(),
                action: None,
                confidence: None,
                latency_ms,
                success: false,
                error_message: Some(e.to_string()),
                recorded_at: Utc::now(),
            },
        };
        if let Err(e) = self.audit.record(interaction).await {
            warn!("Failed to record interaction: {}", e);
        }

        let (intent, data) = outcome?;
        self.repository.increment(counters::QUERIES_ROUTED).await;

        let response = match intent.action {
            Action::Unknown => AgentResponse::clarification(),
            action => AgentResponse::Dispatched {
                action,
                entities: intent.entities.clone(),
                requires_data: true,
            },
        };
        let (data, cached) = match data {
            Some(d) => (Some(d.data), d.cached),
            None => (None, false),
        };

        Ok(RouteOutcome {
            success: true,
            agent: Agent::for_action(intent.action),
            intent: IntentSummary::from(&intent),
            response,
            data,
            cached,
            execution_time: format!("{}ms", latency_ms),
        })
    }

    async fn classify_and_dispatch(
        &self,
        query: &str,
    ) -> Result<(QueryIntentResult, Option<Cached<QueryData>>)> {
        let intent = self.classifier.classify(query).await?;

        let data = match intent.action {
            Action::RetrieveVitals => Some(
                self.repository
                    .vitals(intent.patient_name())
                    .await?
                    .map(QueryData::Vitals),
            ),
            Action::SearchPatients => Some(
                self.repository
                    .search(&intent.search_criteria())
                    .await?
                    .map(QueryData::Search),
            ),
            Action::GenerateHandoff => Some(
                self.repository
                    .handoff(&intent.handoff_criteria())
                    .await?
                    .map(QueryData::Handoff),
            ),
            Action::GetAlerts => Some(self.repository.alerts().await?.map(QueryData::Alerts)),
            Action::Unknown => None,
        };

        Ok((intent, data))
    }
}
