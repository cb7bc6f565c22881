use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateIntentRequest, GatewayStatus, IntentHandle, ProviderName, StatusReport, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::{json_str, secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Debug, Clone)]
pub struct XenditConfig {
    pub secret_key: String,
    pub callback_token: String,
    pub base_url: String,
    pub invoice_duration_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for XenditConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            callback_token: String::new(),
            base_url: "https://api.xendit.co".to_string(),
            invoice_duration_secs: 3600,
            timeout_secs: 15,
            max_retries: 2,
        }
    }
}

impl XenditConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("XENDIT_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "XENDIT_SECRET_KEY environment variable is required".to_string(),
                field: Some("XENDIT_SECRET_KEY".to_string()),
            })?;
        let callback_token =
            std::env::var("XENDIT_CALLBACK_TOKEN").map_err(|_| PaymentError::ValidationError {
                message: "XENDIT_CALLBACK_TOKEN environment variable is required".to_string(),
                field: Some("XENDIT_CALLBACK_TOKEN".to_string()),
            })?;
        let defaults = Self::default();

        Ok(Self {
            secret_key,
            callback_token,
            base_url: std::env::var("XENDIT_BASE_URL").unwrap_or(defaults.base_url),
            invoice_duration_secs: std::env::var("XENDIT_INVOICE_DURATION_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.invoice_duration_secs),
            timeout_secs: std::env::var("XENDIT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .or_else(|| {
                    std::env::var("PAYMENT_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|v| v.parse::<u64>().ok())
                })
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("XENDIT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

/// Xendit invoice integration. The invoice id is the intent id and our
/// reference travels as the invoice `external_id`.
pub struct XenditProvider {
    config: XenditConfig,
    http: PaymentHttpClient,
}

impl XenditProvider {
    pub fn new(config: XenditConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "xendit",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(XenditConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_invoice_status(status: &str) -> GatewayStatus {
        match status.to_ascii_uppercase().as_str() {
            "PAID" | "SETTLED" => GatewayStatus::Paid,
            "EXPIRED" | "FAILED" => GatewayStatus::Failed,
            "PENDING" => GatewayStatus::Pending,
            _ => GatewayStatus::Unknown,
        }
    }

    fn map_event(event_type: Option<&str>, status: Option<&str>) -> GatewayStatus {
        match event_type {
            Some("invoice.paid") => GatewayStatus::Paid,
            Some("invoice.expired") => GatewayStatus::Failed,
            _ => status
                .map(Self::map_invoice_status)
                .unwrap_or(GatewayStatus::Unknown),
        }
    }
}

#[async_trait]
impl PaymentGateway for XenditProvider {
    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<IntentHandle> {
        request.amount.validate_positive("amount")?;
        if request.reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let amount = request.amount.to_json_amount()?;
        let mut payload = serde_json::json!({
            "external_id": request.reference,
            "amount": amount,
            "currency": request.amount.currency,
            "description": request.description,
            "invoice_duration": self.config.invoice_duration_secs,
            "metadata": request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
        });
        if let Some(email) = &request.customer.email {
            payload["payer_email"] = JsonValue::String(email.clone());
        }
        if let Some(url) = &request.success_url {
            payload["success_redirect_url"] = JsonValue::String(url.clone());
        }
        if let Some(url) = &request.failure_url {
            payload["failure_redirect_url"] = JsonValue::String(url.clone());
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/invoices"),
                &self.config.secret_key,
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        let malformed = |message: &str| PaymentError::MalformedResponse {
            provider: "xendit".to_string(),
            message: message.to_string(),
        };
        let invoice_id = json_str(&raw, "/id")
            .map(str::to_string)
            .ok_or_else(|| malformed("missing invoice id"))?;
        let invoice_url = json_str(&raw, "/invoice_url")
            .map(str::to_string)
            .ok_or_else(|| malformed("missing invoice_url"))?;

        info!(
            invoice_id = %invoice_id,
            external_id = %request.reference,
            "xendit invoice created"
        );

        Ok(IntentHandle {
            intent_id: invoice_id,
            link_id: None,
            external_reference: request.reference,
            payment_url: invoice_url,
            provider_data: Some(raw),
        })
    }

    async fn poll_status(&self, intent_id: &str) -> PaymentResult<StatusReport> {
        let result: PaymentResult<JsonValue> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/invoices/{}", intent_id)),
                &self.config.secret_key,
                None,
                &[],
            )
            .await;

        let raw = match result {
            Ok(raw) => raw,
            Err(PaymentError::MalformedResponse { message, .. }) => {
                warn!(invoice_id = %intent_id, error = %message, "unreadable xendit invoice payload");
                return Ok(StatusReport::unknown(None));
            }
            Err(e) => return Err(e),
        };

        let Some(status) = json_str(&raw, "/status").map(str::to_string) else {
            warn!(invoice_id = %intent_id, "xendit invoice payload has no status");
            return Ok(StatusReport::unknown(Some(raw)));
        };

        Ok(StatusReport {
            status: Self::map_invoice_status(&status),
            provider_status: Some(status),
            provider_data: Some(serde_json::json!({ "invoice": raw })),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Xendit
    }

    fn request_deadline(&self) -> Duration {
        self.http.worst_case_duration()
    }

    fn signature_header(&self) -> &'static str {
        CALLBACK_TOKEN_HEADER
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        if self.config.callback_token.is_empty() {
            return Ok(WebhookVerificationResult::rejected(
                "xendit callback token is not configured",
            ));
        }
        let valid = secure_eq(
            self.config.callback_token.as_bytes(),
            signature.trim().as_bytes(),
        );
        Ok(if valid {
            WebhookVerificationResult::accepted()
        } else {
            WebhookVerificationResult::rejected("invalid xendit callback token")
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid webhook JSON payload: {}", e),
                field: Some("payload".to_string()),
            })?;

        // Invoice callbacks arrive either flat or wrapped in an `event` envelope.
        let invoice = parsed.get("data").filter(|v| v.is_object()).unwrap_or(&parsed);
        let event_type = json_str(&parsed, "/event");
        let status = Self::map_event(event_type, json_str(invoice, "/status"));

        Ok(WebhookEvent {
            provider: ProviderName::Xendit,
            event_type: event_type
                .map(str::to_string)
                .or_else(|| {
                    json_str(invoice, "/status").map(|s| format!("invoice.{}", s.to_lowercase()))
                })
                .unwrap_or_else(|| "unknown".to_string()),
            gateway_key: json_str(invoice, "/id").map(str::to_string),
            secondary_key: json_str(invoice, "/external_id").map(str::to_string),
            status,
            payload: parsed.clone(),
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}
