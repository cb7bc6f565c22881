//! Error response formatting
//!
//! Every failed request gets the same JSON body: a machine-readable code, a
//! human-readable message, the request id and whether a retry may succeed.

use crate::error::{AppError, AppErrorKind, ErrorCode, ValidationError};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Whether the client should retry the request
    pub retryable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: error.is_retryable(),
            details: validation_details(error),
        }
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            retryable: false,
            details: None,
        }
    }
}

fn validation_details(error: &AppError) -> Option<serde_json::Value> {
    match &error.kind {
        AppErrorKind::Validation(ValidationError::InvalidField { field, reason }) => {
            Some(serde_json::json!({ "field": field, "error": reason }))
        }
        AppErrorKind::Validation(ValidationError::AmountMismatch { expected, received }) => {
            Some(serde_json::json!({ "expected": expected, "received": received }))
        }
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self.kind,
                context = ?self.context,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self.kind,
                context = ?self.context,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::new(AppErrorKind::Domain(DomainError::OrderAlreadyPaid {
            order_reference: "ORD-20261019-ABCDEF12".to_string(),
        }))
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::OrderAlreadyPaid);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(!error_response.retryable);
        assert!(error_response.message.contains("already been paid"));
    }

    #[test]
    fn test_app_error_into_response() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_serialized_body_shape() {
        let body = serde_json::to_value(ErrorResponse::internal_error(Some("req_456".into())))
            .expect("serializes");
        assert_eq!(body["error"], "INTERNAL_ERROR");
        assert_eq!(body["request_id"], "req_456");
        assert_eq!(body["retryable"], false);
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_amount_mismatch_reports_both_amounts() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::AmountMismatch {
            expected: "150.00".to_string(),
            received: "100.00".to_string(),
        }));

        let body = serde_json::to_value(ErrorResponse::from_app_error(&app_error))
            .expect("serializes");
        assert_eq!(body["error"], "AMOUNT_MISMATCH");
        assert_eq!(body["details"]["expected"], "150.00");
        assert_eq!(body["details"]["received"], "100.00");
    }
}
