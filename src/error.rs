//! Unified error handling for the order and payment backend
//!
//! Every failure a handler can surface is funnelled into [`AppError`], which
//! knows its HTTP status, machine-readable code, user-facing message and
//! whether the client may retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "ORDER_ALREADY_PAID")]
    OrderAlreadyPaid,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,

    // Authentication (401, 403)
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    // External errors (429, 502, 503)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No order matches the given id or reference
    OrderNotFound { order: String },
    /// No payment record matches the lookup key
    PaymentNotFound { lookup: String },
    /// A payment attempt was requested for an order that is already settled
    OrderAlreadyPaid { order_reference: String },
    /// Fulfillment status change not allowed from the current status
    InvalidStatusTransition { from: String, to: String },
}

/// Infrastructure-level errors
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
}

/// Payment gateway failures
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Provider rejected the request or answered with an unexpected payload
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Timeout, connection failure or 5xx from the provider
    GatewayUnavailable { provider: String, message: String },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    /// Payment amount differs from the stored order total
    AmountMismatch { expected: String, received: String },
}

/// Caller and webhook authentication failures
#[derive(Debug, Clone)]
pub enum AuthError {
    InvalidToken { reason: String },
    InvalidSignature { reason: String },
    Forbidden { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Authentication(AuthError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn order_not_found(order: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::OrderNotFound {
            order: order.into(),
        }))
    }

    pub fn payment_not_found(lookup: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            lookup: lookup.into(),
        }))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Authentication(AuthError::Forbidden {
            reason: reason.into(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: message.into(),
            is_retryable: false,
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::OrderAlreadyPaid { .. } => 409, // Conflict
                DomainError::InvalidStatusTransition { .. } => 409,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        500
                    }
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::GatewayUnavailable { .. } => 503,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Authentication(err) => match err {
                AuthError::Forbidden { .. } => 403,
                _ => 401,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::OrderAlreadyPaid { .. } => ErrorCode::OrderAlreadyPaid,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                _ => ErrorCode::ValidationError,
            },
            AppErrorKind::Authentication(err) => match err {
                AuthError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                AuthError::Forbidden { .. } => ErrorCode::Forbidden,
                _ => ErrorCode::Unauthorized,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order } => format!("Order '{}' not found", order),
                DomainError::PaymentNotFound { lookup } => {
                    format!("No payment found for '{}'", lookup)
                }
                DomainError::OrderAlreadyPaid { order_reference } => {
                    format!("Order '{}' has already been paid", order_reference)
                }
                DomainError::InvalidStatusTransition { from, to } => {
                    format!("Cannot move order from '{}' to '{}'", from, to)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        format!("Payment provider ({}) rejected the request", provider)
                    }
                }
                ExternalError::GatewayUnavailable { provider, .. } => format!(
                    "Payment provider ({}) is temporarily unavailable. Please try again",
                    provider
                ),
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!(
                        "Rate limit exceeded for {}. Please try again later",
                        service
                    ),
                },
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::AmountMismatch { expected, received } => format!(
                    "Amount {} does not match the order total {}",
                    received, expected
                ),
            },
            AppErrorKind::Authentication(err) => match err {
                AuthError::InvalidToken { .. } => "Invalid or expired token".to_string(),
                AuthError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
                AuthError::Forbidden { .. } => {
                    "You are not allowed to perform this action".to_string()
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::GatewayUnavailable { .. } => true,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Authentication(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
