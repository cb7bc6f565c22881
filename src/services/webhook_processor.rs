use axum::http::HeaderMap;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::models::ApplyOutcome;
use crate::error::{AppError, AppErrorKind, AuthError, InfrastructureError};
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{GatewayStatus, ProviderName, WebhookEvent};
use crate::services::reconciliation::ReconciliationEngine;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature(reason) => {
                AppError::new(AppErrorKind::Authentication(AuthError::InvalidSignature { reason }))
            }
            WebhookProcessorError::UnknownProvider(provider) => {
                AppError::invalid_field("provider", format!("unknown provider '{}'", provider))
            }
            WebhookProcessorError::StoreUnavailable(message) => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                }))
            }
        }
    }
}

/// What happened to an authenticated delivery. Both variants are acknowledged
/// to the provider with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Ignored(String),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "ok",
            WebhookOutcome::Ignored(_) => "ignored",
        }
    }
}

pub struct WebhookProcessor {
    provider_factory: Arc<PaymentProviderFactory>,
    engine: Arc<ReconciliationEngine>,
}

impl WebhookProcessor {
    pub fn new(
        provider_factory: Arc<PaymentProviderFactory>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            provider_factory,
            engine,
        }
    }

    /// Delivery on `/payments/webhook/{provider}`.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let provider = self.parse_provider(provider_name)?;
        let gateway = self
            .provider_factory
            .get_provider(provider)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;
        self.process_with(gateway, headers, payload).await
    }

    /// Delivery on `/payments/webhook`; the provider is whichever one's
    /// credential header is present.
    pub async fn process_detected(
        &self,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let gateway = self.provider_factory.detect_by_header(headers).ok_or_else(|| {
            WebhookProcessorError::InvalidSignature("no provider signature header".to_string())
        })?;
        self.process_with(gateway, headers, payload).await
    }

    async fn process_with(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let provider = gateway.name();
        let signature = headers
            .get(gateway.signature_header())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                WebhookProcessorError::InvalidSignature(format!(
                    "missing {} header",
                    gateway.signature_header()
                ))
            })?;

        // Signatures are computed over the raw body, never a re-serialised copy.
        let verification = gateway
            .verify_webhook(payload, signature)
            .map_err(|e| WebhookProcessorError::InvalidSignature(e.to_string()))?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            error!(provider = %provider, reason = %reason, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature(reason));
        }

        let event = match gateway.parse_webhook_event(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(provider = %provider, error = %e, "Unparseable webhook event");
                return Ok(WebhookOutcome::Ignored("unparseable event".to_string()));
            }
        };

        self.process_event(event).await
    }

    async fn process_event(
        &self,
        event: WebhookEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        if event.status == GatewayStatus::Unknown {
            info!(
                provider = %event.provider,
                event_type = %event.event_type,
                "Webhook event does not carry a payment status"
            );
            return Ok(WebhookOutcome::Ignored(format!(
                "event type {} not handled",
                event.event_type
            )));
        }

        let keys: Vec<&str> = [event.gateway_key.as_deref(), event.secondary_key.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if keys.is_empty() {
            warn!(provider = %event.provider, event_type = %event.event_type, "Webhook event has no gateway key");
            return Ok(WebhookOutcome::Ignored("missing gateway key".to_string()));
        }

        let metadata = json!({
            "last_webhook": {
                "event_type": event.event_type,
                "received_at": event.received_at,
                "payload": event.payload,
            }
        });

        for key in keys {
            let outcome = self
                .engine
                .apply_gateway_event(key, event.status, metadata.clone())
                .await
                .map_err(|e| WebhookProcessorError::StoreUnavailable(e.to_string()))?;

            if !matches!(outcome, ApplyOutcome::UnknownKey) {
                info!(
                    provider = %event.provider,
                    gateway_key = %key,
                    event_type = %event.event_type,
                    applied = outcome.was_applied(),
                    "Webhook processed successfully"
                );
                return Ok(WebhookOutcome::Processed);
            }
        }

        info!(
            provider = %event.provider,
            event_type = %event.event_type,
            "Webhook references no known payment"
        );
        Ok(WebhookOutcome::Ignored("unknown payment".to_string()))
    }

    fn parse_provider(&self, provider: &str) -> Result<ProviderName, WebhookProcessorError> {
        ProviderName::from_str(provider)
            .ok()
            .filter(ProviderName::is_gateway)
            .ok_or_else(|| WebhookProcessorError::UnknownProvider(provider.to_string()))
    }
}
