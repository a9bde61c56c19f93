//! Cache-aside repository
//!
//! Each expensive read computes a deterministic key, tries the store, and on a
//! miss reads the system of record and writes the result back with the
//! resource's TTL. Store failures never fail a read: they are logged and the
//! value is computed fresh. Records failures propagate.
//!
//! Concurrent misses for one key may both compute and both write; the last
//! write wins.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wardline_kv::{keys, InvalidationEvent, InvalidationPlan, ResourceTtls, StoreClient};

use crate::error::{Result, WardlineError};
use crate::model::{
    AlertEvent, AlertList, AlertRecord, AlertView, Cached, HandoffCriteria, HandoffPatientStats,
    HandoffReport, PatientBrief, PatientCard, PatientRecord, PatientSearchResult, PatientSummary,
    SearchCriteria, StaffMember, VitalsLookup, VitalsReading, VitalsSnapshot,
};
use crate::records::{Directory, RecordSource, RecordsError};

/// Maximum rows returned by a patient search
pub const SEARCH_LIMIT: usize = 20;
/// Maximum alerts in an alert list
pub const ALERT_LIMIT: usize = 20;
/// Maximum length of a handoff summary
pub const SUMMARY_MAX_CHARS: usize = 300;

/// Counter names kept under `counter:{name}`
pub mod counters {
    pub const QUERIES_ROUTED: &str = "queries_routed";
    pub const CACHE_HITS: &str = "cache_hits";
    pub const CACHE_MISSES: &str = "cache_misses";
}

/// Snapshot of the service counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub queries_routed: i64,
    pub cache_hits: i64,
    pub cache_misses: i64,
}

pub struct CacheAsideRepository {
    store: StoreClient,
    records: Arc<dyn RecordSource>,
    directory: Arc<dyn Directory>,
    ttls: ResourceTtls,
    records_timeout: Duration,
}

impl CacheAsideRepository {
    pub fn new(
        store: StoreClient,
        records: Arc<dyn RecordSource>,
        directory: Arc<dyn Directory>,
        ttls: ResourceTtls,
        records_timeout: Duration,
    ) -> Self {
        Self {
            store,
            records,
            directory,
            ttls,
            records_timeout,
        }
    }

    /// Run a records query under the caller-side timeout
    async fn query<T, Fut>(&self, context: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, RecordsError>>,
    {
        let outcome = match tokio::time::timeout(self.records_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RecordsError::Timeout(self.records_timeout.as_millis() as u64)),
        };
        outcome.map_err(|e| {
            error!(context = context, "Records query failed: {}", e);
            WardlineError::records(context, e)
        })
    }

    /// Cache-aside read; a `None` result is returned but not cached
    async fn cache_aside<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Option<Cached<T>>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match self.store.get_json::<T>(key).await {
            Ok(Some(data)) => {
                debug!(key = key, "Cache hit");
                self.increment(counters::CACHE_HITS).await;
                return Ok(Some(Cached::hit(data)));
            }
            Ok(None) => debug!(key = key, "Cache miss"),
            Err(e) => warn!(key = key, "Cache read failed, computing fresh: {}", e),
        }
        self.increment(counters::CACHE_MISSES).await;

        let Some(data) = compute().await? else {
            return Ok(None);
        };

        if let Err(e) = self.store.set_json(key, &data, Some(ttl)).await {
            warn!(key = key, "Cache write failed: {}", e);
        }
        Ok(Some(Cached::fresh(data)))
    }

    async fn fetch_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cached = self
            .cache_aside(key, ttl, move || async move { compute().await.map(Some) })
            .await?;
        // compute always yields a value
        cached.ok_or_else(|| {
            WardlineError::records(key, RecordsError::Unavailable("empty result".into()))
        })
    }

    /// Patient card under `patient:{id}`
    pub async fn patient(&self, patient_id: &str) -> Result<Option<Cached<PatientCard>>> {
        self.cache_aside(&keys::patient(patient_id), self.ttls.patient, || async {
            let record = self.query("patient", self.records.patient(patient_id)).await?;
            Ok(record.as_ref().map(PatientCard::from))
        })
        .await
    }

    /// Card for an already-resolved patient, populating `patient:{id}` on miss
    async fn patient_card(&self, record: &PatientRecord) -> Result<Cached<PatientCard>> {
        self.fetch_or_compute(&keys::patient(&record.id), self.ttls.patient, || async {
            Ok(PatientCard::from(record))
        })
        .await
    }

    /// Latest vitals for a patient named in free text
    ///
    /// The name is resolved against the records on every call; the snapshot
    /// itself is cached under `vitals:{id}:latest`.
    pub async fn vitals(&self, patient_name: Option<&str>) -> Result<Cached<VitalsLookup>> {
        let Some(name) = patient_name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(Cached::fresh(VitalsLookup::not_found(
                "Please specify a patient name",
            )));
        };

        let record = self
            .query("find_patient_by_name", self.records.find_patient_by_name(name))
            .await?;
        let Some(record) = record else {
            return Ok(Cached::fresh(VitalsLookup::not_found(format!(
                "No patient found matching \"{}\"",
                name
            ))));
        };

        let card = self.patient_card(&record).await?.data;

        let snapshot = self
            .fetch_or_compute(&keys::vitals_latest(&record.id), self.ttls.vitals, || async {
                let reading = self
                    .query("latest_vitals", self.records.latest_vitals(&record.id))
                    .await?;
                Ok(VitalsSnapshot::from_reading(&record.id, reading.as_ref()))
            })
            .await?;

        Ok(snapshot.map(|vitals| VitalsLookup {
            found: true,
            patient: Some(PatientBrief {
                name: card.name,
                room: card.room,
                department: card.department,
            }),
            vitals: Some(vitals),
            message: None,
        }))
    }

    /// Patient search, cached under `search:{digest-of-criteria}`
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Cached<PatientSearchResult>> {
        let compute = || async {
            let rows = self
                .query("search_patients", self.records.search_patients(criteria, SEARCH_LIMIT))
                .await?;
            self.summarize_search(criteria, rows).await
        };

        match keys::search(criteria) {
            Ok(key) => self.fetch_or_compute(&key, self.ttls.search, compute).await,
            Err(e) => {
                warn!("Search key derivation failed, bypassing cache: {}", e);
                compute().await.map(Cached::fresh)
            }
        }
    }

    async fn summarize_search(
        &self,
        criteria: &SearchCriteria,
        rows: Vec<PatientRecord>,
    ) -> Result<PatientSearchResult> {
        let mut patients = Vec::with_capacity(rows.len());
        for p in rows {
            let assigned_nurse = match &p.assigned_nurse_id {
                Some(id) => self
                    .query("staff", self.directory.staff(id))
                    .await?
                    .map(|s: StaffMember| s.full_name())
                    .unwrap_or_else(|| "Unassigned".to_string()),
                None => "Unassigned".to_string(),
            };
            patients.push(PatientSummary {
                name: p.full_name(),
                id: p.id,
                mrn: p.mrn,
                room: p.room,
                department: p.department,
                admitted_on: p.admitted_on,
                conditions: p.conditions,
                allergies: p.allergies,
                assigned_nurse,
            });
        }

        Ok(PatientSearchResult {
            found: !patients.is_empty(),
            count: patients.len(),
            patients,
            search_criteria: criteria.clone(),
        })
    }

    /// Shift handoff report, cached under `handoff:{digest-of-criteria}`
    pub async fn handoff(&self, criteria: &HandoffCriteria) -> Result<Cached<HandoffReport>> {
        let compute = || async {
            let since = chrono::Utc::now() - chrono::Duration::hours(criteria.window_hours as i64);
            let rows = self
                .query(
                    "shift_activity",
                    self.records.shift_activity(since, criteria.department.as_deref()),
                )
                .await?;

            let summary = summarize(
                &format!(
                    "Shift handoff for {} patients over the last {} hours. Key activities include vital signs monitoring, medication administration, and patient notes.",
                    rows.len(),
                    criteria.window_hours
                ),
                SUMMARY_MAX_CHARS,
            );

            Ok(HandoffReport {
                shift_summary: summary,
                patient_count: rows.len(),
                patients: rows
                    .into_iter()
                    .map(|r| HandoffPatientStats {
                        name: r.patient.full_name(),
                        room: r.patient.room,
                        department: r.patient.department,
                        vitals_checked: r.vitals_count,
                        medications_given: r.medications_count,
                        notes_added: r.notes_count,
                        last_vitals_check: r.last_vitals_check,
                    })
                    .collect(),
                generated_at: chrono::Utc::now(),
            })
        };

        match keys::handoff(criteria) {
            Ok(key) => self.fetch_or_compute(&key, self.ttls.handoff, compute).await,
            Err(e) => {
                warn!("Handoff key derivation failed, bypassing cache: {}", e);
                compute().await.map(Cached::fresh)
            }
        }
    }

    /// Unread alerts, critical first then newest first, under `alerts:unread`
    pub async fn alerts(&self) -> Result<Cached<AlertList>> {
        self.fetch_or_compute(&keys::alerts_unread(), self.ttls.alerts, || async {
            let mut rows = self.query("unread_alerts", self.records.unread_alerts()).await?;
            sort_alerts(&mut rows);
            rows.truncate(ALERT_LIMIT);

            let mut alerts = Vec::with_capacity(rows.len());
            for row in rows {
                let patient = match &row.event.patient_ref {
                    Some(id) => self.query("patient", self.records.patient(id)).await?,
                    None => None,
                };
                alerts.push(AlertView {
                    id: row.event.id,
                    alert_type: row.alert_type,
                    severity: row.event.severity,
                    title: row.event.title,
                    message: row.event.message,
                    patient: patient
                        .as_ref()
                        .map(PatientRecord::full_name)
                        .unwrap_or_else(|| "N/A".to_string()),
                    room: patient.map(|p| p.room),
                    timestamp: row.event.created_at,
                    acknowledged: row.acknowledged,
                });
            }

            Ok(AlertList {
                count: alerts.len(),
                alerts,
            })
        })
        .await
    }

    /// Write a vitals reading, then drop the patient's derived keys
    pub async fn record_vitals(&self, reading: VitalsReading) -> Result<Option<InvalidationEvent>> {
        let patient_id = reading.patient_id.clone();
        self.query("record_vitals", self.records.record_vitals(reading))
            .await?;

        match self.store.invalidate(InvalidationPlan::for_patient(&patient_id)).await {
            Ok(event) => {
                info!(patient_id = %patient_id, removed = event.removed, "Vitals recorded, cache invalidated");
                Ok(Some(event))
            }
            Err(e) => {
                warn!(patient_id = %patient_id, "Cache invalidation failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Store an alert, then drop the cached unread list
    pub async fn record_alert(&self, alert: &AlertEvent, alert_type: &str) -> Result<()> {
        self.query("record_alert", self.records.record_alert(alert, alert_type))
            .await?;

        if let Err(e) = self.store.invalidate(InvalidationPlan::for_alerts()).await {
            warn!(alert_id = %alert.id, "Alert list invalidation failed: {}", e);
        }
        Ok(())
    }

    /// Resolve a patient record directly from the records
    pub async fn patient_record(&self, patient_id: &str) -> Result<Option<PatientRecord>> {
        self.query("patient", self.records.patient(patient_id)).await
    }

    /// Bump `counter:{name}`; failures are logged only
    pub async fn increment(&self, name: &str) {
        if let Err(e) = self.store.incr(&keys::counter(name)).await {
            debug!(counter = name, "Counter increment skipped: {}", e);
        }
    }

    /// Read a counter; unreadable counters read as 0
    pub async fn count(&self, name: &str) -> i64 {
        match self.store.get(&keys::counter(name)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub async fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            queries_routed: self.count(counters::QUERIES_ROUTED).await,
            cache_hits: self.count(counters::CACHE_HITS).await,
            cache_misses: self.count(counters::CACHE_MISSES).await,
        }
    }
}

/// Severity descending, then newest first
pub fn sort_alerts(alerts: &mut [AlertRecord]) {
    alerts.sort_by(|a, b| {
        b.event
            .severity
            .cmp(&a.event.severity)
            .then_with(|| b.event.created_at.cmp(&a.event.created_at))
    });
}

/// Cap text at `max_chars`, marking truncation with an ellipsis
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;
    use crate::records::InMemoryRecords;
    use chrono::Utc;
    use wardline_kv::{StoreConfig, StorePool};

    struct Fixture {
        pool: StorePool,
        records: Arc<InMemoryRecords>,
        repo: CacheAsideRepository,
    }

    fn fixture() -> Fixture {
        fixture_over(InMemoryRecords::seeded())
    }

    fn fixture_over(records: InMemoryRecords) -> Fixture {
        let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
        let records = Arc::new(records);
        let repo = CacheAsideRepository::new(
            pool.client(),
            records.clone(),
            records.clone(),
            ResourceTtls::default(),
            Duration::from_secs(5),
        );
        Fixture {
            pool,
            records,
            repo,
        }
    }

    fn reading(patient_id: &str, systolic: u32) -> VitalsReading {
        VitalsReading {
            patient_id: patient_id.to_string(),
            systolic_bp: Some(systolic),
            diastolic_bp: Some(80),
            heart_rate: Some(72),
            temperature: Some(98.4),
            oxygen_saturation: Some(98),
            blood_glucose: None,
            is_critical: false,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_vitals_miss_then_hit() {
        let f = fixture();

        let first = f.repo.vitals(Some("John Doe")).await.unwrap();
        assert!(!first.cached);
        assert!(first.data.found);
        assert_eq!(first.data.vitals.as_ref().unwrap().blood_pressure, "145/92 mmHg");

        let second = f.repo.vitals(Some("John Doe")).await.unwrap();
        assert!(second.cached);
        assert_eq!(first.data, second.data);

        // the name lookup reads the records on every call; the snapshot does not
        assert_eq!(f.records.reads(), 3);
    }

    #[tokio::test]
    async fn test_vitals_populates_patient_card() {
        let f = fixture();

        f.repo.vitals(Some("Sarah")).await.unwrap();
        let card = f.repo.patient("p2").await.unwrap().unwrap();
        assert!(card.cached);
        assert_eq!(card.data.room, "102");
    }

    #[tokio::test]
    async fn test_vitals_without_name_or_match() {
        let f = fixture();

        let none = f.repo.vitals(None).await.unwrap();
        assert!(!none.data.found);
        assert_eq!(none.data.message.as_deref(), Some("Please specify a patient name"));

        let missing = f.repo.vitals(Some("Nobody Here")).await.unwrap();
        assert!(!missing.data.found);
        assert_eq!(f.records.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vitals_ttl_expiry_recomputes() {
        let f = fixture();

        f.repo.vitals(Some("John Doe")).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(f.repo.vitals(Some("John Doe")).await.unwrap().cached);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!f.repo.vitals(Some("John Doe")).await.unwrap().cached);
    }

    #[tokio::test]
    async fn test_new_reading_is_never_shadowed_by_cache() {
        let f = fixture();

        let before = f.repo.vitals(Some("John Doe")).await.unwrap();
        assert_eq!(before.data.vitals.unwrap().blood_pressure, "145/92 mmHg");

        let event = f.repo.record_vitals(reading("p1", 118)).await.unwrap().unwrap();
        assert_eq!(event.removed, 2);

        let after = f.repo.vitals(Some("John Doe")).await.unwrap();
        assert!(!after.cached);
        assert_eq!(after.data.vitals.unwrap().blood_pressure, "118/80 mmHg");
    }

    #[tokio::test]
    async fn test_search_is_cached_by_canonical_criteria() {
        let f = fixture();
        let criteria = SearchCriteria {
            condition: Some("diabetic".into()),
            department: Some("ICU".into()),
            timeframe: None,
        };

        let first = f.repo.search(&criteria).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.data.count, 1);
        assert_eq!(first.data.patients[0].assigned_nurse, "Alice Johnson");

        let key = keys::search(&criteria).unwrap();
        assert!(f.pool.client().get(&key).await.unwrap().is_some());

        let second = f.repo.search(&criteria).await.unwrap();
        assert!(second.cached);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_both_compute() {
        let criteria = SearchCriteria {
            condition: Some("diabetic".into()),
            department: Some("ICU".into()),
            timeframe: None,
        };

        let sequential = fixture();
        sequential.repo.search(&criteria).await.unwrap();
        let reads_per_compute = sequential.records.reads();

        let f = fixture_over(InMemoryRecords::seeded().with_latency(Duration::from_millis(50)));
        let (first, second) = tokio::join!(f.repo.search(&criteria), f.repo.search(&criteria));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(!first.cached);
        assert!(!second.cached);
        assert_eq!(first.data, second.data);
        assert_eq!(f.records.reads(), 2 * reads_per_compute);

        let third = f.repo.search(&criteria).await.unwrap();
        assert!(third.cached);
        assert_eq!(third.data, first.data);
        assert_eq!(f.records.reads(), 2 * reads_per_compute);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let f = fixture();
        f.pool.backend().set_reachable(false);

        let first = f.repo.search(&SearchCriteria::default()).await.unwrap();
        let second = f.repo.search(&SearchCriteria::default()).await.unwrap();
        assert!(!first.cached);
        assert!(!second.cached);
        assert_eq!(first.data.count, 3);

        assert!(f.repo.record_vitals(reading("p1", 120)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_outage_propagates() {
        let f = fixture();
        f.records.set_available(false);

        let result = f.repo.alerts().await;
        assert!(matches!(result, Err(WardlineError::SystemOfRecord { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_timeout() {
        let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
        let records = Arc::new(InMemoryRecords::seeded().with_latency(Duration::from_secs(10)));
        let repo = CacheAsideRepository::new(
            pool.client(),
            records.clone(),
            records,
            ResourceTtls::default(),
            Duration::from_secs(2),
        );

        match repo.alerts().await {
            Err(WardlineError::SystemOfRecord { source, .. }) => {
                assert_eq!(source, RecordsError::Timeout(2000))
            }
            other => panic!("expected timeout, got {:?}", other.map(|c| c.data)),
        }
    }

    #[tokio::test]
    async fn test_alerts_ordered_by_severity() {
        let f = fixture();

        let low = AlertEvent::new(Severity::Low, "Linen", "Room 201 linen change");
        f.repo.record_alert(&low, "housekeeping").await.unwrap();

        let list = f.repo.alerts().await.unwrap();
        let severities: Vec<Severity> = list.data.alerts.iter().map(|a| a.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::Medium, Severity::Low]
        );
        assert_eq!(list.data.alerts[0].patient, "Sarah Smith");
        assert_eq!(list.data.alerts[2].patient, "N/A");
    }

    #[tokio::test]
    async fn test_recording_alert_invalidates_list() {
        let f = fixture();

        assert_eq!(f.repo.alerts().await.unwrap().data.count, 2);
        assert!(f.repo.alerts().await.unwrap().cached);

        let alert = AlertEvent::new(Severity::High, "Fall risk", "Room 101").for_patient("p1");
        f.repo.record_alert(&alert, "fall_risk").await.unwrap();

        let list = f.repo.alerts().await.unwrap();
        assert!(!list.cached);
        assert_eq!(list.data.count, 3);
        assert_eq!(list.data.alerts[1].title, "Fall risk");
    }

    #[tokio::test]
    async fn test_handoff_report() {
        let f = fixture();

        let report = f.repo.handoff(&HandoffCriteria::default()).await.unwrap();
        assert!(!report.cached);
        assert_eq!(report.data.patient_count, 3);
        assert!(report.data.shift_summary.starts_with("Shift handoff for 3 patients"));

        let again = f.repo.handoff(&HandoffCriteria::default()).await.unwrap();
        assert!(again.cached);
        assert_eq!(report.data, again.data);

        let icu = f
            .repo
            .handoff(&HandoffCriteria {
                department: Some("ICU".into()),
                window_hours: 8,
            })
            .await
            .unwrap();
        assert!(!icu.cached);
        assert_eq!(icu.data.patient_count, 2);
    }

    #[tokio::test]
    async fn test_counters() {
        let f = fixture();

        f.repo.alerts().await.unwrap();
        f.repo.alerts().await.unwrap();

        let counters = f.repo.counters().await;
        assert_eq!(counters.cache_misses, 1);
        assert_eq!(counters.cache_hits, 1);
        assert_eq!(counters.queries_routed, 0);
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("short", 300), "short");
        assert_eq!(summarize("abcdef ghij", 7), "abcdef...");
        assert_eq!(summarize("ééééé", 3), "ééé...");
    }
}
