//! System of record
//!
//! `RecordSource` is the authoritative data the repository consults on a cache
//! miss; `Directory` resolves staff accounts for login. `InMemoryRecords`
//! implements both over a seeded ward so the service runs standalone.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::{
    AlertEvent, AlertRecord, PatientRecord, SearchCriteria, Severity, ShiftActivity, StaffMember,
    VitalsReading,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordsError {
    #[error("records unavailable: {0}")]
    Unavailable(String),

    #[error("records query timed out after {0}ms")]
    Timeout(u64),

    #[error("no such {entity}: {id}")]
    NotFound { entity: &'static str, id: String },
}

pub type RecordsResult<T> = std::result::Result<T, RecordsError>;

/// Authoritative clinical data
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// First active patient whose full name contains `name` (case-insensitive)
    async fn find_patient_by_name(&self, name: &str) -> RecordsResult<Option<PatientRecord>>;

    async fn patient(&self, id: &str) -> RecordsResult<Option<PatientRecord>>;

    async fn latest_vitals(&self, patient_id: &str) -> RecordsResult<Option<VitalsReading>>;

    /// Active patients matching the criteria, newest admission first
    async fn search_patients(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> RecordsResult<Vec<PatientRecord>>;

    /// Per-patient activity since `since`, ordered by room
    async fn shift_activity(
        &self,
        since: DateTime<Utc>,
        department: Option<&str>,
    ) -> RecordsResult<Vec<ShiftActivity>>;

    async fn unread_alerts(&self) -> RecordsResult<Vec<AlertRecord>>;

    async fn record_vitals(&self, reading: VitalsReading) -> RecordsResult<()>;

    async fn record_alert(&self, alert: &AlertEvent, alert_type: &str) -> RecordsResult<()>;
}

/// Staff accounts
#[async_trait]
pub trait Directory: Send + Sync {
    async fn staff_by_email(&self, email: &str) -> RecordsResult<Option<StaffMember>>;

    async fn staff(&self, id: &str) -> RecordsResult<Option<StaffMember>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivityKind {
    Medication,
    Note,
}

#[derive(Debug, Clone)]
struct Activity {
    patient_id: String,
    kind: ActivityKind,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ward {
    staff: Vec<StaffMember>,
    patients: Vec<PatientRecord>,
    vitals: Vec<VitalsReading>,
    alerts: Vec<AlertRecord>,
    activity: Vec<Activity>,
}

/// In-process records with a reachability switch and read counter
pub struct InMemoryRecords {
    ward: RwLock<Ward>,
    available: AtomicBool,
    reads: AtomicU64,
    latency: Duration,
}

impl InMemoryRecords {
    pub fn empty() -> Self {
        Self {
            ward: RwLock::new(Ward::default()),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            latency: Duration::ZERO,
        }
    }

    /// A small ward: three staff, three patients, two readings, two alerts
    pub fn seeded() -> Self {
        let now = Utc::now();
        let hours_ago = |h: i64| now - ChronoDuration::hours(h);
        let minutes_ago = |m: i64| now - ChronoDuration::minutes(m);

        let staff = vec![
            staff("1", "alice.nurse@wardline.local", "Alice", "Johnson", "nurse", "ICU"),
            staff("2", "bob.nurse@wardline.local", "Bob", "Smith", "nurse", "ER"),
            staff("3", "admin@wardline.local", "Admin", "User", "admin", "Administration"),
        ];

        let patients = vec![
            PatientRecord {
                id: "p1".into(),
                mrn: "MRN001".into(),
                first_name: "John".into(),
                last_name: "Doe".into(),
                room: "101".into(),
                department: "ICU".into(),
                conditions: vec!["diabetic".into(), "hypertension".into()],
                allergies: vec!["Penicillin".into()],
                active: true,
                admitted_on: hours_ago(72),
                assigned_nurse_id: Some("1".into()),
            },
            PatientRecord {
                id: "p2".into(),
                mrn: "MRN002".into(),
                first_name: "Sarah".into(),
                last_name: "Smith".into(),
                room: "102".into(),
                department: "ICU".into(),
                conditions: vec!["cardiac".into()],
                allergies: vec!["Sulfa drugs".into()],
                active: true,
                admitted_on: hours_ago(30),
                assigned_nurse_id: Some("1".into()),
            },
            PatientRecord {
                id: "p3".into(),
                mrn: "MRN003".into(),
                first_name: "Robert".into(),
                last_name: "Johnson".into(),
                room: "201".into(),
                department: "ER".into(),
                conditions: vec!["pneumonia".into()],
                allergies: Vec::new(),
                active: true,
                admitted_on: hours_ago(5),
                assigned_nurse_id: Some("2".into()),
            },
        ];

        let vitals = vec![
            VitalsReading {
                patient_id: "p1".into(),
                systolic_bp: Some(145),
                diastolic_bp: Some(92),
                heart_rate: Some(78),
                temperature: Some(98.6),
                oxygen_saturation: Some(96),
                blood_glucose: Some(140),
                is_critical: false,
                recorded_at: minutes_ago(60),
            },
            VitalsReading {
                patient_id: "p2".into(),
                systolic_bp: Some(165),
                diastolic_bp: Some(105),
                heart_rate: Some(95),
                temperature: Some(99.2),
                oxygen_saturation: Some(92),
                blood_glucose: None,
                is_critical: true,
                recorded_at: minutes_ago(30),
            },
        ];

        let alerts = vec![
            AlertRecord {
                event: AlertEvent {
                    id: "a1".into(),
                    patient_ref: Some("p2".into()),
                    severity: Severity::Critical,
                    title: "Critical Blood Pressure".into(),
                    message: "Patient Sarah Smith (Room 102) has critically elevated blood pressure: 165/105 mmHg.".into(),
                    created_at: minutes_ago(30),
                    recipients: vec!["1".into()],
                },
                alert_type: "critical_vitals".into(),
                is_read: false,
                acknowledged: false,
            },
            AlertRecord {
                event: AlertEvent {
                    id: "a2".into(),
                    patient_ref: Some("p1".into()),
                    severity: Severity::Medium,
                    title: "Medication Due".into(),
                    message: "Patient John Doe (Room 101) - Metformin 500mg due in 30 minutes.".into(),
                    created_at: minutes_ago(15),
                    recipients: vec!["1".into()],
                },
                alert_type: "medication_due".into(),
                is_read: false,
                acknowledged: false,
            },
        ];

        let activity = vec![
            Activity {
                patient_id: "p1".into(),
                kind: ActivityKind::Medication,
                at: hours_ago(2),
            },
            Activity {
                patient_id: "p1".into(),
                kind: ActivityKind::Note,
                at: hours_ago(1),
            },
            Activity {
                patient_id: "p2".into(),
                kind: ActivityKind::Medication,
                at: hours_ago(3),
            },
            Activity {
                patient_id: "p3".into(),
                kind: ActivityKind::Note,
                at: hours_ago(12),
            },
        ];

        Self {
            ward: RwLock::new(Ward {
                staff,
                patients,
                vitals,
                alerts,
                activity,
            }),
            ..Self::empty()
        }
    }

    /// Delay every query by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Simulate the records backend going away (or coming back)
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("Records marked unavailable");
        }
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of queries served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    async fn enter(&self, query: &str) -> RecordsResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(RecordsError::Unavailable("records backend offline".to_string()));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        debug!(query = query, "Records query");
        Ok(())
    }
}

fn staff(id: &str, email: &str, first: &str, last: &str, role: &str, dept: &str) -> StaffMember {
    StaffMember {
        id: id.into(),
        email: email.into(),
        first_name: first.into(),
        last_name: last.into(),
        role: role.into(),
        department: dept.into(),
    }
}

fn latest_for<'a>(vitals: &'a [VitalsReading], patient_id: &str) -> Option<&'a VitalsReading> {
    vitals
        .iter()
        .filter(|v| v.patient_id == patient_id)
        .max_by_key(|v| v.recorded_at)
}

#[async_trait]
impl RecordSource for InMemoryRecords {
    async fn find_patient_by_name(&self, name: &str) -> RecordsResult<Option<PatientRecord>> {
        self.enter("find_patient_by_name").await?;
        let needle = name.trim().to_lowercase();
        let ward = self.ward.read().await;
        Ok(ward
            .patients
            .iter()
            .find(|p| p.active && p.full_name().to_lowercase().contains(&needle))
            .cloned())
    }

    async fn patient(&self, id: &str) -> RecordsResult<Option<PatientRecord>> {
        self.enter("patient").await?;
        let ward = self.ward.read().await;
        Ok(ward.patients.iter().find(|p| p.id == id).cloned())
    }

    async fn latest_vitals(&self, patient_id: &str) -> RecordsResult<Option<VitalsReading>> {
        self.enter("latest_vitals").await?;
        let ward = self.ward.read().await;
        Ok(latest_for(&ward.vitals, patient_id).cloned())
    }

    async fn search_patients(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> RecordsResult<Vec<PatientRecord>> {
        self.enter("search_patients").await?;
        let since = criteria.timeframe.map(|t| t.since(Utc::now()));
        let ward = self.ward.read().await;

        let mut matches: Vec<PatientRecord> = ward
            .patients
            .iter()
            .filter(|p| p.active)
            .filter(|p| {
                criteria
                    .condition
                    .as_ref()
                    .map(|c| p.conditions.iter().any(|pc| pc.eq_ignore_ascii_case(c)))
                    .unwrap_or(true)
            })
            .filter(|p| {
                criteria
                    .department
                    .as_ref()
                    .map(|d| p.department.eq_ignore_ascii_case(d))
                    .unwrap_or(true)
            })
            .filter(|p| since.map(|s| p.admitted_on >= s).unwrap_or(true))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.admitted_on.cmp(&a.admitted_on));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn shift_activity(
        &self,
        since: DateTime<Utc>,
        department: Option<&str>,
    ) -> RecordsResult<Vec<ShiftActivity>> {
        self.enter("shift_activity").await?;
        let ward = self.ward.read().await;

        let mut rows: Vec<ShiftActivity> = ward
            .patients
            .iter()
            .filter(|p| p.active)
            .filter(|p| {
                department
                    .map(|d| p.department.eq_ignore_ascii_case(d))
                    .unwrap_or(true)
            })
            .map(|p| {
                let recent_vitals: Vec<&VitalsReading> = ward
                    .vitals
                    .iter()
                    .filter(|v| v.patient_id == p.id && v.recorded_at > since)
                    .collect();
                let count_kind = |kind: ActivityKind| {
                    ward.activity
                        .iter()
                        .filter(|a| a.patient_id == p.id && a.kind == kind && a.at > since)
                        .count() as u32
                };

                ShiftActivity {
                    patient: p.clone(),
                    vitals_count: recent_vitals.len() as u32,
                    medications_count: count_kind(ActivityKind::Medication),
                    notes_count: count_kind(ActivityKind::Note),
                    last_vitals_check: recent_vitals.iter().map(|v| v.recorded_at).max(),
                }
            })
            .collect();

        rows.sort_by(|a, b| a.patient.room.cmp(&b.patient.room));
        Ok(rows)
    }

    async fn unread_alerts(&self) -> RecordsResult<Vec<AlertRecord>> {
        self.enter("unread_alerts").await?;
        let ward = self.ward.read().await;
        Ok(ward.alerts.iter().filter(|a| !a.is_read).cloned().collect())
    }

    async fn record_vitals(&self, reading: VitalsReading) -> RecordsResult<()> {
        self.enter("record_vitals").await?;
        let mut ward = self.ward.write().await;
        if !ward.patients.iter().any(|p| p.id == reading.patient_id) {
            return Err(RecordsError::NotFound {
                entity: "patient",
                id: reading.patient_id,
            });
        }
        ward.vitals.push(reading);
        Ok(())
    }

    async fn record_alert(&self, alert: &AlertEvent, alert_type: &str) -> RecordsResult<()> {
        self.enter("record_alert").await?;
        self.ward.write().await.alerts.push(AlertRecord {
            event: alert.clone(),
            alert_type: alert_type.to_string(),
            is_read: false,
            acknowledged: false,
        });
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryRecords {
    async fn staff_by_email(&self, email: &str) -> RecordsResult<Option<StaffMember>> {
        self.enter("staff_by_email").await?;
        let ward = self.ward.read().await;
        Ok(ward
            .staff
            .iter()
            .find(|s| s.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn staff(&self, id: &str) -> RecordsResult<Option<StaffMember>> {
        self.enter("staff").await?;
        let ward = self.ward.read().await;
        Ok(ward.staff.iter().find(|s| s.id == id).cloned())
    }
}
