//! HTTP handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use wardline_kv::{CacheStats, HealthCheckResult, HealthStatus, SessionRecord};

use super::auth::Claims;
use super::middleware::SESSION_HEADER;
use crate::context::AppContext;
use crate::error::{FieldError, Result, WardlineError};
use crate::gateway::{ALERTS_TOPIC, NOTIFICATIONS_TOPIC};
use crate::model::{AlertEvent, Notification, Severity, StaffMember, VitalsReading};
use crate::repository::CounterSnapshot;
use crate::router::QueryContext;

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub store: HealthCheckResult,
    pub store_stats: CacheStats,
    pub counters: CounterSnapshot,
    pub connected_clients: usize,
}

/// Health check endpoint
pub async fn health_check(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let store = ctx.store.health_check().await;
    let status = StatusCode::from_u16(store.status.to_http_status_code())
        .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);

    let body = HealthResponse {
        status: store.status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        store_stats: ctx.pool().stats().await,
        counters: ctx.repository.counters().await,
        connected_clients: ctx.gateway.connected_clients(),
        store,
    };
    (status, Json(body))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub department: String,
}

impl From<&StaffMember> for UserInfo {
    fn from(staff: &StaffMember) -> Self {
        Self {
            id: staff.id.clone(),
            email: staff.email.clone(),
            name: staff.full_name(),
            role: staff.role.clone(),
            department: staff.department.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub session_id: String,
    pub expires_in_hours: i64,
    pub user: UserInfo,
}

/// Issue a token and a session for a known staff email
///
/// Passwords are not checked against anything; any non-empty password is
/// accepted for a directory account.
pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let mut fields = Vec::new();
    if payload.email.trim().is_empty() {
        fields.push(FieldError::new("email", "Email is required"));
    }
    if payload.password.is_empty() {
        fields.push(FieldError::new("password", "Password is required"));
    }
    if !fields.is_empty() {
        return Err(WardlineError::Validation { fields });
    }

    let staff = ctx
        .directory
        .staff_by_email(payload.email.trim())
        .await
        .map_err(|e| WardlineError::records("staff_by_email", e))?
        .ok_or_else(|| WardlineError::Unauthorized("Invalid credentials".into()))?;

    // tokens are only valid while their session exists
    let session = SessionRecord::new(&staff.id, &staff.email, &staff.role);
    ctx.sessions.store(&session).await?;

    let token = ctx
        .jwt
        .generate_token(&staff, &session.session_id)
        .map_err(|e| WardlineError::Internal(e.to_string()))?;

    info!(subject_id = %staff.id, "Login");
    Ok(Json(LoginResponse {
        success: true,
        token,
        session_id: session.session_id,
        expires_in_hours: ctx.jwt.ttl_hours(),
        user: UserInfo::from(&staff),
    }))
}

/// Revoke a session owned by the caller
///
/// The session named by `x-session-id` is revoked when it belongs to the
/// caller; without the header the token's own session is revoked.
pub async fn logout(
    State(ctx): State<Arc<AppContext>>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(claims.sid.as_str())
        .to_string();

    let revoked = match revoke_owned(&ctx, &claims, &session_id).await {
        Ok(revoked) => revoked,
        Err(e) => {
            warn!(session_id = %session_id, "Session revocation failed: {}", e);
            false
        }
    };

    info!(subject_id = %claims.sub, revoked = revoked, "Logout");
    Json(json!({
        "success": true,
        "message": "Logged out successfully",
        "revoked": revoked,
    }))
}

async fn revoke_owned(ctx: &AppContext, claims: &Claims, session_id: &str) -> Result<bool> {
    match ctx.sessions.fetch(session_id).await? {
        Some(session) if session.subject_id == claims.sub => {
            Ok(ctx.sessions.revoke(session_id).await?)
        }
        Some(_) => {
            warn!(
                subject_id = %claims.sub,
                session_id = session_id,
                "Refusing to revoke another subject's session"
            );
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Echo the caller's claims
pub async fn verify(Extension(claims): Extension<Claims>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "user": {
            "id": claims.sub,
            "email": claims.email,
            "role": claims.role,
        },
    }))
}

#[derive(Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Natural-language query endpoint
pub async fn agent_query(
    State(ctx): State<Arc<AppContext>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<QueryRequest>,
) -> Result<Response> {
    let query = payload.query.unwrap_or_default();
    let query_ctx = QueryContext {
        subject_id: claims.sub,
        extra: payload.context.unwrap_or_default(),
    };

    let outcome = ctx.router.route(&query, &query_ctx).await?;
    Ok(Json(outcome).into_response())
}

/// Cached patient card
pub async fn patient(
    State(ctx): State<Arc<AppContext>>,
    Path(patient_id): Path<String>,
) -> Result<Response> {
    match ctx.repository.patient(&patient_id).await? {
        Some(card) => Ok(Json(json!({
            "success": true,
            "data": card.data,
            "cached": card.cached,
        }))
        .into_response()),
        None => Ok(not_found("Patient not found")),
    }
}

/// Cached unread alert list
pub async fn list_alerts(State(ctx): State<Arc<AppContext>>) -> Result<Response> {
    let list = ctx.repository.alerts().await?;
    Ok(Json(json!({
        "success": true,
        "data": list.data,
        "cached": list.cached,
    }))
    .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsInput {
    pub systolic_bp: Option<u32>,
    pub diastolic_bp: Option<u32>,
    pub heart_rate: Option<u32>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<u32>,
    pub blood_glucose: Option<u32>,
    #[serde(default)]
    pub is_critical: bool,
}

/// Record a reading; a critical reading also raises an alert
pub async fn record_vitals(
    State(ctx): State<Arc<AppContext>>,
    Extension(claims): Extension<Claims>,
    Path(patient_id): Path<String>,
    Json(input): Json<VitalsInput>,
) -> Result<Response> {
    let has_measurement = input.systolic_bp.is_some()
        || input.diastolic_bp.is_some()
        || input.heart_rate.is_some()
        || input.temperature.is_some()
        || input.oxygen_saturation.is_some()
        || input.blood_glucose.is_some();
    if !has_measurement {
        return Err(WardlineError::invalid(
            "vitals",
            "At least one measurement is required",
        ));
    }

    let Some(patient) = ctx.repository.patient_record(&patient_id).await? else {
        return Ok(not_found("Patient not found"));
    };

    let reading = VitalsReading {
        patient_id: patient.id.clone(),
        systolic_bp: input.systolic_bp,
        diastolic_bp: input.diastolic_bp,
        heart_rate: input.heart_rate,
        temperature: input.temperature,
        oxygen_saturation: input.oxygen_saturation,
        blood_glucose: input.blood_glucose,
        is_critical: input.is_critical,
        recorded_at: Utc::now(),
    };
    let invalidation = ctx.repository.record_vitals(reading).await?;
    info!(patient_id = %patient.id, recorded_by = %claims.sub, "Vitals recorded");

    let alert = if input.is_critical {
        let mut alert = AlertEvent::new(
            Severity::Critical,
            "Critical vitals",
            format!(
                "{} in room {} has critical vital signs",
                patient.full_name(),
                patient.room
            ),
        )
        .for_patient(&patient.id);
        if let Some(nurse) = &patient.assigned_nurse_id {
            alert = alert.to_recipient(nurse);
        }

        ctx.repository.record_alert(&alert, "vitals").await?;
        publish(&ctx, ALERTS_TOPIC, &alert).await;
        Some(alert)
    } else {
        None
    };

    Ok(Json(json!({
        "success": true,
        "invalidated": invalidation.map(|e| e.removed).unwrap_or(0),
        "alert": alert,
    }))
    .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInput {
    #[serde(default)]
    pub patient_ref: Option<String>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub alert_type: Option<String>,
}

/// Record an alert and publish it on the `alerts` topic
pub async fn publish_alert(
    State(ctx): State<Arc<AppContext>>,
    Json(input): Json<AlertInput>,
) -> Result<Response> {
    let mut fields = Vec::new();
    let severity = match input.severity.parse::<Severity>() {
        Ok(severity) => Some(severity),
        Err(e) => {
            fields.push(FieldError::new("severity", e));
            None
        }
    };
    if input.title.trim().is_empty() {
        fields.push(FieldError::new("title", "Title is required"));
    }
    if input.message.trim().is_empty() {
        fields.push(FieldError::new("message", "Message is required"));
    }
    let Some(severity) = severity.filter(|_| fields.is_empty()) else {
        return Err(WardlineError::Validation { fields });
    };

    let mut alert = AlertEvent::new(severity, input.title.trim(), input.message.trim());
    if let Some(patient_ref) = input.patient_ref {
        alert = alert.for_patient(patient_ref);
    }
    for recipient in input.recipients {
        alert = alert.to_recipient(recipient);
    }

    let alert_type = input.alert_type.unwrap_or_else(|| "general".to_string());
    ctx.repository.record_alert(&alert, &alert_type).await?;
    let delivered = publish(&ctx, ALERTS_TOPIC, &alert).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "alert": alert,
            "delivered": delivered,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInput {
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

/// Publish a notification for one staff member
pub async fn notify(
    State(ctx): State<Arc<AppContext>>,
    Json(input): Json<NotificationInput>,
) -> Result<Response> {
    let mut fields = Vec::new();
    for (field, value) in [
        ("subjectId", &input.subject_id),
        ("title", &input.title),
        ("message", &input.message),
    ] {
        if value.trim().is_empty() {
            fields.push(FieldError::new(field, format!("{} is required", field)));
        }
    }
    if !fields.is_empty() {
        return Err(WardlineError::Validation { fields });
    }

    let notification = Notification {
        subject_id: input.subject_id.trim().to_string(),
        title: input.title,
        message: input.message,
        created_at: Utc::now(),
    };
    let delivered = publish(&ctx, NOTIFICATIONS_TOPIC, &notification).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "notification": notification,
            "delivered": delivered,
        })),
    )
        .into_response())
}

/// Publish fire-and-forget; a bus failure is logged and reported as zero
/// subscribers reached
async fn publish<T: Serialize>(ctx: &AppContext, topic: &str, event: &T) -> usize {
    match ctx.bus.publish(topic, event).await {
        Ok(reached) => reached,
        Err(e) => {
            warn!(topic = topic, "Event not published: {}", e);
            0
        }
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}
