//! Error taxonomy for the query and alert paths
//!
//! Infrastructure and classifier failures are recovered where they happen and
//! normally never reach a caller. System-of-record and validation failures are
//! user-visible and turn into `success: false` responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use wardline_kv::StoreError;

use crate::records::RecordsError;

/// One offending request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum WardlineError {
    /// Store or bus unreachable
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] StoreError),

    /// Upstream classifier failed or timed out
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// The system of record failed while serving a request
    #[error("System of record error during {context}: {source}")]
    SystemOfRecord {
        context: String,
        #[source]
        source: RecordsError,
    },

    /// Request failed validation
    #[error("Validation failed: {}", field_names(.fields))]
    Validation { fields: Vec<FieldError> },

    /// Missing or rejected credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Failure in the service itself, e.g. token signing
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WardlineError>;

fn field_names(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl WardlineError {
    pub fn records(context: impl Into<String>, source: RecordsError) -> Self {
        WardlineError::SystemOfRecord {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        WardlineError::Validation {
            fields: vec![FieldError::new(field, message)],
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WardlineError::Validation { .. } => StatusCode::BAD_REQUEST,
            WardlineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WardlineError::Infrastructure(_)
            | WardlineError::Classifier(_)
            | WardlineError::SystemOfRecord { .. }
            | WardlineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WardlineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            WardlineError::Validation { fields } => json!({
                "success": false,
                "error": "Validation failed",
                "errors": fields,
            }),
            WardlineError::Unauthorized(reason) => json!({
                "success": false,
                "error": reason,
            }),
            // Detail stays in the logs
            _ => json!({
                "success": false,
                "error": "Failed to process request",
                "message": "An internal error occurred. Please try again.",
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            WardlineError::invalid("query", "Query is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WardlineError::records("search", RecordsError::Unavailable("down".into()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WardlineError::Unauthorized("Invalid token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_validation_message_lists_fields() {
        let err = WardlineError::Validation {
            fields: vec![
                FieldError::new("query", "Query is required"),
                FieldError::new("context", "must be an object"),
            ],
        };
        assert_eq!(err.to_string(), "Validation failed: query, context");
    }

    #[test]
    fn test_store_error_converts_to_infrastructure() {
        let err: WardlineError = StoreError::ConnectionError("refused".into()).into();
        assert!(matches!(err, WardlineError::Infrastructure(_)));
    }
}
