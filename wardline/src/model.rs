//! Domain types shared by the records layer, the repository and the gateway
//!
//! Cached aggregates (`VitalsLookup`, `PatientSearchResult`, `HandoffReport`,
//! `AlertList`, `PatientCard`) are stored in the key/value store exactly as
//! they are serialized here, so a cache hit is a plain decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alert severity, ordered `Low < Medium < High < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Who an alert is delivered to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connected client
    Everyone,
    /// Only clients joined to these subjects' rooms
    Subjects(Vec<String>),
}

/// A published clinical alert; immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_ref: Option<String>,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Staff ids to notify; empty means hospital-wide
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

impl AlertEvent {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_ref: None,
            severity,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            recipients: Vec::new(),
        }
    }

    pub fn for_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_ref = Some(patient_id.into());
        self
    }

    pub fn to_recipient(mut self, subject_id: impl Into<String>) -> Self {
        let subject_id = subject_id.into();
        if !self.recipients.contains(&subject_id) {
            self.recipients.push(subject_id);
        }
        self
    }

    /// Critical alerts and alerts without recipients go to everyone
    pub fn audience(&self) -> Audience {
        if self.severity == Severity::Critical || self.recipients.is_empty() {
            Audience::Everyone
        } else {
            Audience::Subjects(self.recipients.clone())
        }
    }
}

/// A message for one staff member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subject_id: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Staff account known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub department: String,
}

impl StaffMember {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Patient row in the system of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub room: String,
    pub department: String,
    pub conditions: Vec<String>,
    pub allergies: Vec<String>,
    pub active: bool,
    pub admitted_on: DateTime<Utc>,
    pub assigned_nurse_id: Option<String>,
}

impl PatientRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One vitals reading in the system of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsReading {
    pub patient_id: String,
    pub systolic_bp: Option<u32>,
    pub diastolic_bp: Option<u32>,
    pub heart_rate: Option<u32>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<u32>,
    pub blood_glucose: Option<u32>,
    #[serde(default)]
    pub is_critical: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Latest vitals, formatted for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSnapshot {
    pub patient_ref: String,
    pub blood_pressure: String,
    pub heart_rate: String,
    pub temperature: String,
    pub oxygen_saturation: String,
    pub blood_glucose: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

const NOT_AVAILABLE: &str = "N/A";

fn or_na<T>(value: Option<T>, format: impl Fn(T) -> String) -> String {
    value.map(format).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

impl VitalsSnapshot {
    /// Format a reading; a patient without readings gets all `N/A`
    pub fn from_reading(patient_id: &str, reading: Option<&VitalsReading>) -> Self {
        let Some(r) = reading else {
            return Self {
                patient_ref: patient_id.to_string(),
                blood_pressure: NOT_AVAILABLE.to_string(),
                heart_rate: NOT_AVAILABLE.to_string(),
                temperature: NOT_AVAILABLE.to_string(),
                oxygen_saturation: NOT_AVAILABLE.to_string(),
                blood_glucose: NOT_AVAILABLE.to_string(),
                recorded_at: None,
            };
        };

        let blood_pressure = match (r.systolic_bp, r.diastolic_bp) {
            (Some(sys), Some(dia)) => format!("{}/{} mmHg", sys, dia),
            _ => NOT_AVAILABLE.to_string(),
        };

        Self {
            patient_ref: patient_id.to_string(),
            blood_pressure,
            heart_rate: or_na(r.heart_rate, |v| format!("{} bpm", v)),
            temperature: or_na(r.temperature, |v| format!("{}°F", v)),
            oxygen_saturation: or_na(r.oxygen_saturation, |v| format!("{}%", v)),
            blood_glucose: or_na(r.blood_glucose, |v| format!("{} mg/dL", v)),
            recorded_at: Some(r.recorded_at),
        }
    }
}

/// Name, room and department of a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientBrief {
    pub name: String,
    pub room: String,
    pub department: String,
}

/// Result of a vitals lookup by patient name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsLookup {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientBrief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitals: Option<VitalsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VitalsLookup {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            found: false,
            patient: None,
            vitals: None,
            message: Some(message.into()),
        }
    }
}

/// Cached `patient:{id}` card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientCard {
    pub id: String,
    pub mrn: String,
    pub name: String,
    pub room: String,
    pub department: String,
    pub conditions: Vec<String>,
    pub allergies: Vec<String>,
    pub assigned_nurse_id: Option<String>,
}

impl From<&PatientRecord> for PatientCard {
    fn from(p: &PatientRecord) -> Self {
        Self {
            id: p.id.clone(),
            mrn: p.mrn.clone(),
            name: p.full_name(),
            room: p.room.clone(),
            department: p.department.clone(),
            conditions: p.conditions.clone(),
            allergies: p.allergies.clone(),
            assigned_nurse_id: p.assigned_nurse_id.clone(),
        }
    }
}

/// Admission window for patient searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Today,
    Week,
    Month,
}

impl Timeframe {
    /// Earliest admission time included
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc())
                .unwrap_or(now),
            Timeframe::Week => now - chrono::Duration::days(7),
            Timeframe::Month => now - chrono::Duration::days(30),
        }
    }
}

/// Patient search criteria; the cache key is derived from its canonical form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
}

/// One row of a patient search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: String,
    pub mrn: String,
    pub name: String,
    pub room: String,
    pub department: String,
    pub admitted_on: DateTime<Utc>,
    pub conditions: Vec<String>,
    pub allergies: Vec<String>,
    pub assigned_nurse: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSearchResult {
    pub found: bool,
    pub count: usize,
    pub patients: Vec<PatientSummary>,
    pub search_criteria: SearchCriteria,
}

/// Shift handoff parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub window_hours: u32,
}

impl Default for HandoffCriteria {
    fn default() -> Self {
        Self {
            department: None,
            window_hours: 8,
        }
    }
}

/// Per-patient activity within a handoff window, as read from the records
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftActivity {
    pub patient: PatientRecord,
    pub vitals_count: u32,
    pub medications_count: u32,
    pub notes_count: u32,
    pub last_vitals_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffPatientStats {
    pub name: String,
    pub room: String,
    pub department: String,
    pub vitals_checked: u32,
    pub medications_given: u32,
    pub notes_added: u32,
    pub last_vitals_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffReport {
    pub shift_summary: String,
    pub patient_count: usize,
    pub patients: Vec<HandoffPatientStats>,
    pub generated_at: DateTime<Utc>,
}

/// Stored alert, including read state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub event: AlertEvent,
    pub alert_type: String,
    pub is_read: bool,
    pub acknowledged: bool,
}

/// Alert as shown in an alert list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub patient: String,
    pub room: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertList {
    pub count: usize,
    pub alerts: Vec<AlertView>,
}

/// A repository result and whether it came from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub cached: bool,
}

impl<T> Cached<T> {
    pub fn hit(data: T) -> Self {
        Self { data, cached: true }
    }

    pub fn fresh(data: T) -> Self {
        Self {
            data,
            cached: false,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cached<U> {
        Cached {
            data: f(self.data),
            cached: self.cached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);

        let mut levels = vec![Severity::Medium, Severity::Critical, Severity::Low, Severity::High];
        levels.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            levels,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
        );
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_alert_audience() {
        let broadcast = AlertEvent::new(Severity::High, "Fall risk", "Room 101");
        assert_eq!(broadcast.audience(), Audience::Everyone);

        let targeted = AlertEvent::new(Severity::Medium, "Medication due", "Metformin")
            .to_recipient("1");
        assert_eq!(targeted.audience(), Audience::Subjects(vec!["1".to_string()]));

        let critical = AlertEvent::new(Severity::Critical, "BP", "165/105").to_recipient("1");
        assert_eq!(critical.audience(), Audience::Everyone);
    }

    #[test]
    fn test_alert_wire_format() {
        let alert = AlertEvent::new(Severity::Critical, "Critical Blood Pressure", "165/105 mmHg")
            .for_patient("p2");
        let json = serde_json::to_value(&alert).unwrap();

        assert_eq!(json["patientRef"], "p2");
        assert_eq!(json["severity"], "critical");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("recipients").is_none());
    }

    #[test]
    fn test_vitals_formatting() {
        let reading = VitalsReading {
            patient_id: "p1".to_string(),
            systolic_bp: Some(145),
            diastolic_bp: Some(92),
            heart_rate: Some(78),
            temperature: Some(98.6),
            oxygen_saturation: Some(96),
            blood_glucose: None,
            is_critical: false,
            recorded_at: Utc::now(),
        };

        let snapshot = VitalsSnapshot::from_reading("p1", Some(&reading));
        assert_eq!(snapshot.blood_pressure, "145/92 mmHg");
        assert_eq!(snapshot.heart_rate, "78 bpm");
        assert_eq!(snapshot.temperature, "98.6°F");
        assert_eq!(snapshot.oxygen_saturation, "96%");
        assert_eq!(snapshot.blood_glucose, "N/A");

        let empty = VitalsSnapshot::from_reading("p3", None);
        assert_eq!(empty.blood_pressure, "N/A");
        assert_eq!(empty.recorded_at, None);
    }

    #[test]
    fn test_search_criteria_omits_unset_fields() {
        let criteria = SearchCriteria {
            department: Some("ICU".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&criteria).unwrap(),
            r#"{"department":"ICU"}"#
        );
    }
}
