//! Intent classification
//!
//! A `Classifier` maps free text to an action, extracted entities and a
//! confidence. `KeywordClassifier` is deterministic and always available;
//! `FallbackClassifier` puts a remote or otherwise fallible classifier in
//! front of it with a timeout, so classification itself never fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, WardlineError};
use crate::model::{HandoffCriteria, SearchCriteria, Timeframe};

/// Extracted query parameters
pub type Entities = BTreeMap<String, String>;

/// What a query asks for; dispatch over it is exhaustive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RetrieveVitals,
    SearchPatients,
    GenerateHandoff,
    GetAlerts,
    Unknown,
}

impl Action {
    /// Intent label reported to clients
    pub fn intent(&self) -> &'static str {
        match self {
            Action::RetrieveVitals => "get_vitals",
            Action::SearchPatients => "search_patient",
            Action::GenerateHandoff => "generate_handoff",
            Action::GetAlerts => "check_alerts",
            Action::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntentResult {
    pub action: Action,
    pub entities: Entities,
    pub confidence: f64,
}

impl QueryIntentResult {
    pub fn new(action: Action, entities: Entities, confidence: f64) -> Self {
        Self {
            action,
            entities,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn patient_name(&self) -> Option<&str> {
        self.entities.get("patientName").map(String::as_str)
    }

    pub fn search_criteria(&self) -> SearchCriteria {
        SearchCriteria {
            condition: self.entities.get("condition").cloned(),
            department: self.entities.get("department").cloned(),
            timeframe: self.entities.get("timeframe").and_then(|t| match t.as_str() {
                "today" => Some(Timeframe::Today),
                "week" => Some(Timeframe::Week),
                "month" => Some(Timeframe::Month),
                _ => None,
            }),
        }
    }

    pub fn handoff_criteria(&self) -> HandoffCriteria {
        HandoffCriteria {
            department: self.entities.get("department").cloned(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<QueryIntentResult>;
}

const VITALS_CONFIDENCE: f64 = 0.85;
const SEARCH_CONFIDENCE: f64 = 0.80;
const ALERTS_CONFIDENCE: f64 = 0.80;
const HANDOFF_CONFIDENCE: f64 = 0.75;
const UNKNOWN_CONFIDENCE: f64 = 0.20;

const RETRIEVAL_VERBS: &[&str] = &["show", "get", "find", "search", "list"];
const VITALS_TERMS: &[&str] = &["vital", "bp", "blood pressure", "heart rate", "temperature"];
const ALERT_TERMS: &[&str] = &["alert", "emergency", "critical"];
const HANDOFF_TERMS: &[&str] = &["handoff", "hand-off", "shift", "report"];
const CONDITIONS: &[(&str, &str)] = &[
    ("diabet", "diabetic"),
    ("hypertension", "hypertension"),
    ("cardiac", "cardiac"),
    ("pneumonia", "pneumonia"),
    ("covid", "covid"),
];
const DEPARTMENTS: &[(&str, &str)] = &[
    ("icu", "ICU"),
    ("er", "ER"),
    ("emergency", "ER"),
    ("surgical", "SURGICAL"),
    ("medical", "MEDICAL"),
];
/// Capitalized words that are never part of a patient name
const NAME_STOPWORDS: &[&str] = &[
    "show", "get", "find", "search", "list", "vitals", "vital", "patient", "patients", "bp",
    "for", "of", "the", "me", "what", "are", "is", "icu", "er", "please", "latest",
];

/// Deterministic keyword heuristics
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn analyze(&self, text: &str) -> QueryIntentResult {
        let lower = text.to_lowercase();
        let words = tokens(&lower);
        let has = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

        if has(VITALS_TERMS) {
            return QueryIntentResult::new(
                Action::RetrieveVitals,
                extract_patient_name(text),
                VITALS_CONFIDENCE,
            );
        }

        let has_verb = RETRIEVAL_VERBS.iter().any(|v| words.contains(v));
        if has_verb && lower.contains("patient") {
            return QueryIntentResult::new(
                Action::SearchPatients,
                extract_search_terms(&lower, &words),
                SEARCH_CONFIDENCE,
            );
        }

        if has(ALERT_TERMS) {
            return QueryIntentResult::new(Action::GetAlerts, Entities::new(), ALERTS_CONFIDENCE);
        }

        if has(HANDOFF_TERMS) {
            let mut entities = Entities::new();
            if let Some(dept) = department(&words) {
                entities.insert("department".into(), dept.into());
            }
            return QueryIntentResult::new(Action::GenerateHandoff, entities, HANDOFF_CONFIDENCE);
        }

        QueryIntentResult::new(Action::Unknown, Entities::new(), UNKNOWN_CONFIDENCE)
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, text: &str) -> Result<QueryIntentResult> {
        Ok(self.analyze(text))
    }
}

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect()
}

fn department(words: &[&str]) -> Option<&'static str> {
    DEPARTMENTS
        .iter()
        .find(|(word, _)| words.contains(word))
        .map(|(_, dept)| *dept)
}

fn extract_search_terms(lower: &str, words: &[&str]) -> Entities {
    let mut entities = Entities::new();

    if let Some((_, condition)) = CONDITIONS.iter().find(|(stem, _)| lower.contains(stem)) {
        entities.insert("condition".into(), condition.to_string());
    }
    if let Some(dept) = department(words) {
        entities.insert("department".into(), dept.into());
    }
    for timeframe in ["today", "week", "month"] {
        if words.contains(&timeframe) {
            entities.insert("timeframe".into(), timeframe.into());
        }
    }

    entities
}

/// First run of capitalized words that are not query vocabulary
fn extract_patient_name(text: &str) -> Entities {
    let mut run: Vec<String> = Vec::new();

    for raw in text.split_whitespace() {
        let word = raw
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
            .trim_end_matches("'s");
        let capitalized = word.chars().next().map(char::is_uppercase).unwrap_or(false)
            && word.chars().skip(1).all(|c| c.is_lowercase() || c == '\'' || c == '-');
        let stop = NAME_STOPWORDS.contains(&word.to_lowercase().as_str());

        if capitalized && !stop && run.len() < 3 {
            run.push(word.to_string());
        } else if !run.is_empty() {
            break;
        }
    }

    let mut entities = Entities::new();
    if !run.is_empty() {
        entities.insert("patientName".into(), run.join(" "));
    }
    entities
}

/// Primary classifier guarded by a timeout, falling back to keywords
pub struct FallbackClassifier {
    primary: Arc<dyn Classifier>,
    fallback: KeywordClassifier,
    timeout: Duration,
}

impl FallbackClassifier {
    pub fn new(primary: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self {
            primary,
            fallback: KeywordClassifier,
            timeout,
        }
    }
}

#[async_trait]
impl Classifier for FallbackClassifier {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn classify(&self, text: &str) -> Result<QueryIntentResult> {
        let outcome = match tokio::time::timeout(self.timeout, self.primary.classify(text)).await {
            Ok(result) => result,
            Err(_) => Err(WardlineError::Classifier(format!(
                "{} timed out after {}ms",
                self.primary.name(),
                self.timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(intent) => {
                debug!(classifier = self.primary.name(), action = ?intent.action, "Classified");
                Ok(intent)
            }
            Err(e) => {
                warn!("Classifier failed, using keyword fallback: {}", e);
                Ok(self.fallback.analyze(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenClassifier;

    #[async_trait]
    impl Classifier for BrokenClassifier {
        fn name(&self) -> &str {
            "broken"
        }

        async fn classify(&self, _text: &str) -> Result<QueryIntentResult> {
            Err(WardlineError::Classifier("upstream returned 503".into()))
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn classify(&self, _text: &str) -> Result<QueryIntentResult> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(QueryIntentResult::new(Action::GetAlerts, Entities::new(), 0.99))
        }
    }

    #[test]
    fn test_vitals_query() {
        let intent = KeywordClassifier.analyze("show vitals for John Doe");
        assert_eq!(intent.action, Action::RetrieveVitals);
        assert_eq!(intent.patient_name(), Some("John Doe"));
        assert_eq!(intent.confidence, 0.85);
    }

    #[test]
    fn test_patient_name_skips_leading_vocabulary() {
        let intent = KeywordClassifier.analyze("Show BP for patient Sarah Smith's latest reading");
        assert_eq!(intent.patient_name(), Some("Sarah Smith"));
    }

    #[test]
    fn test_search_query() {
        let intent = KeywordClassifier.analyze("Find diabetic patients in ICU");
        assert_eq!(intent.action, Action::SearchPatients);
        assert_eq!(intent.confidence, 0.80);

        let criteria = intent.search_criteria();
        assert_eq!(criteria.condition.as_deref(), Some("diabetic"));
        assert_eq!(criteria.department.as_deref(), Some("ICU"));
        assert_eq!(criteria.timeframe, None);
    }

    #[test]
    fn test_department_matches_whole_words() {
        // "er" inside other words is not the ER department
        let intent = KeywordClassifier.analyze("search patients admitted this week");
        assert_eq!(intent.search_criteria().department, None);
        assert_eq!(intent.search_criteria().timeframe, Some(Timeframe::Week));
    }

    #[test]
    fn test_alerts_and_handoff() {
        let alerts = KeywordClassifier.analyze("any critical alerts?");
        assert_eq!(alerts.action, Action::GetAlerts);

        let handoff = KeywordClassifier.analyze("Generate shift handoff for ICU");
        assert_eq!(handoff.action, Action::GenerateHandoff);
        assert_eq!(handoff.confidence, 0.75);
        assert_eq!(handoff.handoff_criteria().department.as_deref(), Some("ICU"));
        assert_eq!(handoff.handoff_criteria().window_hours, 8);
    }

    #[test]
    fn test_unknown() {
        let intent = KeywordClassifier.analyze("what's for lunch");
        assert_eq!(intent.action, Action::Unknown);
        assert_eq!(intent.confidence, 0.20);
        assert!(intent.entities.is_empty());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let intent = QueryIntentResult::new(Action::GetAlerts, Entities::new(), 1.7);
        assert_eq!(intent.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_fallback_on_error() {
        let classifier = FallbackClassifier::new(Arc::new(BrokenClassifier), Duration::from_secs(1));

        let intent = classifier.classify("show vitals for John Doe").await.unwrap();
        assert_eq!(intent.action, Action::RetrieveVitals);
        assert_eq!(intent.confidence, 0.85);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_on_timeout() {
        let classifier = FallbackClassifier::new(Arc::new(SlowClassifier), Duration::from_secs(2));

        let intent = classifier.classify("Find diabetic patients in ICU").await.unwrap();
        assert_eq!(intent.action, Action::SearchPatients);
    }

    #[tokio::test]
    async fn test_primary_result_used_when_healthy() {
        let classifier =
            FallbackClassifier::new(Arc::new(KeywordClassifier), Duration::from_secs(1));
        assert_eq!(classifier.name(), "keyword");

        let intent = classifier.classify("any emergency alerts").await.unwrap();
        assert_eq!(intent.action, Action::GetAlerts);
    }
}
