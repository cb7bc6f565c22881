use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Timeout, connection failure or 5xx from the provider. Never interpreted
    /// as a payment status.
    #[error("Gateway unavailable: provider={provider}, message={message}")]
    GatewayUnavailable { provider: String, message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    /// The provider answered 2xx but the body did not match the expected shape.
    #[error("Malformed provider response: provider={provider}, message={message}")]
    MalformedResponse { provider: String, message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::GatewayUnavailable { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::MalformedResponse { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::GatewayUnavailable { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::MalformedResponse { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::GatewayUnavailable { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::MalformedResponse { .. } | PaymentError::ProviderError { .. } => {
                "Payment provider returned an error".to_string()
            }
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            PaymentError::GatewayUnavailable { provider, .. }
            | PaymentError::MalformedResponse { provider, .. }
            | PaymentError::ProviderError { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, AuthError, ExternalError, ValidationError};

        let provider = err.provider().unwrap_or("payments").to_string();
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::GatewayUnavailable { message, .. } => {
                AppErrorKind::External(ExternalError::GatewayUnavailable { provider, message })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: provider,
                retry_after: retry_after_seconds,
            }),
            PaymentError::WebhookVerificationError { message } => {
                AppErrorKind::Authentication(AuthError::InvalidSignature { reason: message })
            }
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}
