use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateIntentRequest, GatewayStatus, IntentHandle, ProviderName, StatusReport, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::{hmac_sha256_hex, json_str, secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "paymongo-signature";

#[derive(Debug, Clone)]
pub struct PaymongoConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub livemode: bool,
    /// Maximum age of a signed webhook timestamp; 0 disables the check.
    pub signature_tolerance_secs: u64,
    pub payment_method_types: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaymongoConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paymongo.com/v1".to_string(),
            livemode: false,
            signature_tolerance_secs: 300,
            payment_method_types: vec![
                "gcash".to_string(),
                "paymaya".to_string(),
                "card".to_string(),
            ],
            timeout_secs: 15,
            max_retries: 2,
        }
    }
}

impl PaymongoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYMONGO_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "PAYMONGO_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYMONGO_SECRET_KEY".to_string()),
            })?;
        let defaults = Self::default();

        Ok(Self {
            webhook_secret: std::env::var("PAYMONGO_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYMONGO_BASE_URL").unwrap_or(defaults.base_url),
            livemode: std::env::var("PAYMONGO_LIVEMODE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(secret_key.starts_with("sk_live_")),
            signature_tolerance_secs: std::env::var("PAYMONGO_SIGNATURE_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.signature_tolerance_secs),
            payment_method_types: std::env::var("PAYMONGO_PAYMENT_METHODS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.payment_method_types),
            timeout_secs: std::env::var("PAYMONGO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .or_else(|| {
                    std::env::var("PAYMENT_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|v| v.parse::<u64>().ok())
                })
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("PAYMONGO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            secret_key,
        })
    }
}

/// PayMongo checkout-session integration. Each attempt opens a checkout
/// session (stored as the link id) wrapping a payment intent (the intent id).
pub struct PaymongoProvider {
    config: PaymongoConfig,
    http: PaymentHttpClient,
}

impl PaymongoProvider {
    pub fn new(config: PaymongoConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "paymongo",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaymongoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn malformed(message: impl Into<String>) -> PaymentError {
        PaymentError::MalformedResponse {
            provider: "paymongo".to_string(),
            message: message.into(),
        }
    }

    fn map_intent_status(status: &str) -> GatewayStatus {
        match status {
            "succeeded" => GatewayStatus::Paid,
            "awaiting_payment_method" | "awaiting_next_action" | "processing" => {
                GatewayStatus::Pending
            }
            _ => GatewayStatus::Unknown,
        }
    }

    fn map_event_type(event_type: &str) -> GatewayStatus {
        match event_type {
            "checkout_session.payment.paid" | "link.payment.paid" | "payment.paid" => {
                GatewayStatus::Paid
            }
            "payment.failed" => GatewayStatus::Failed,
            _ => GatewayStatus::Unknown,
        }
    }
}

/// Parsed `Paymongo-Signature` header: `t=<unix>,te=<hex>,li=<hex>`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: Option<i64>,
    pub test_signature: Option<String>,
    pub live_signature: Option<String>,
}

impl SignatureHeader {
    pub fn parse(raw: &str) -> Self {
        let mut header = Self::default();
        for part in raw.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "t" => header.timestamp = value.parse::<i64>().ok(),
                "te" if !value.is_empty() => header.test_signature = Some(value.to_string()),
                "li" if !value.is_empty() => header.live_signature = Some(value.to_string()),
                _ => {}
            }
        }
        header
    }
}

#[async_trait]
impl PaymentGateway for PaymongoProvider {
    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<IntentHandle> {
        request.amount.validate_positive("amount")?;
        let amount = request.amount.to_minor_units()?;
        if request.reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let mut attributes = serde_json::json!({
            "line_items": [{
                "name": request.description,
                "amount": amount,
                "currency": request.amount.currency,
                "quantity": 1,
            }],
            "payment_method_types": self.config.payment_method_types,
            "reference_number": request.reference,
            "description": request.description,
            "send_email_receipt": false,
            "show_description": true,
            "show_line_items": true,
            "metadata": request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
        });
        if let Some(url) = &request.success_url {
            attributes["success_url"] = JsonValue::String(url.clone());
        }
        if let Some(url) = &request.failure_url {
            attributes["cancel_url"] = JsonValue::String(url.clone());
        }
        if request.customer.name.is_some() || request.customer.email.is_some() {
            attributes["billing"] = serde_json::json!({
                "name": request.customer.name,
                "email": request.customer.email,
                "phone": request.customer.phone,
            });
        }
        let payload = serde_json::json!({ "data": { "attributes": attributes } });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/checkout_sessions"),
                &self.config.secret_key,
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        let session_id = json_str(&raw, "/data/id")
            .map(str::to_string)
            .ok_or_else(|| Self::malformed("missing checkout session id"))?;
        let checkout_url = json_str(&raw, "/data/attributes/checkout_url")
            .map(str::to_string)
            .ok_or_else(|| Self::malformed("missing checkout_url"))?;
        let intent_id = json_str(&raw, "/data/attributes/payment_intent/id")
            .map(str::to_string)
            .ok_or_else(|| Self::malformed("missing payment intent id"))?;

        info!(
            intent_id = %intent_id,
            checkout_session = %session_id,
            reference = %request.reference,
            "paymongo checkout session created"
        );

        Ok(IntentHandle {
            intent_id,
            link_id: Some(session_id),
            external_reference: request.reference,
            payment_url: checkout_url,
            provider_data: Some(raw),
        })
    }

    async fn poll_status(&self, intent_id: &str) -> PaymentResult<StatusReport> {
        let result: PaymentResult<JsonValue> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/payment_intents/{}", intent_id)),
                &self.config.secret_key,
                None,
                &[],
            )
            .await;

        let raw = match result {
            Ok(raw) => raw,
            Err(PaymentError::MalformedResponse { message, .. }) => {
                warn!(intent_id = %intent_id, error = %message, "unreadable paymongo intent payload");
                return Ok(StatusReport::unknown(None));
            }
            Err(e) => return Err(e),
        };

        let Some(status) = json_str(&raw, "/data/attributes/status").map(str::to_string) else {
            warn!(intent_id = %intent_id, "paymongo intent payload has no status");
            return Ok(StatusReport::unknown(Some(raw)));
        };

        Ok(StatusReport {
            status: Self::map_intent_status(&status),
            provider_status: Some(status),
            provider_data: Some(serde_json::json!({
                "payment_intent": raw.pointer("/data/attributes").cloned(),
            })),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Paymongo
    }

    fn request_deadline(&self) -> Duration {
        self.http.worst_case_duration()
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        let header = SignatureHeader::parse(signature);

        let Some(timestamp) = header.timestamp else {
            return Ok(WebhookVerificationResult::rejected(
                "missing timestamp in paymongo signature",
            ));
        };
        if self.config.signature_tolerance_secs > 0 {
            let age = chrono::Utc::now().timestamp() - timestamp;
            if age.unsigned_abs() > self.config.signature_tolerance_secs {
                return Ok(WebhookVerificationResult::rejected(
                    "paymongo signature timestamp outside tolerance",
                ));
            }
        }

        let expected = if self.config.livemode {
            header.live_signature
        } else {
            header.test_signature
        };
        let Some(expected) = expected else {
            return Ok(WebhookVerificationResult::rejected(
                "missing paymongo signature for current mode",
            ));
        };

        let mut signed = Vec::with_capacity(payload.len() + 16);
        signed.extend_from_slice(timestamp.to_string().as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);

        let valid = hmac_sha256_hex(&signed, secret)
            .map(|computed| secure_eq(computed.as_bytes(), expected.as_bytes()))
            .unwrap_or(false);

        Ok(if valid {
            WebhookVerificationResult::accepted()
        } else {
            WebhookVerificationResult::rejected("invalid paymongo signature")
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid webhook JSON payload: {}", e),
                field: Some("payload".to_string()),
            })?;

        let event_type = json_str(&parsed, "/data/attributes/type")
            .unwrap_or("unknown")
            .to_string();
        let resource = parsed
            .pointer("/data/attributes/data")
            .cloned()
            .unwrap_or(JsonValue::Null);

        let (gateway_key, secondary_key) = match json_str(&resource, "/type") {
            Some("payment") => (
                json_str(&resource, "/attributes/payment_intent_id"),
                json_str(&resource, "/attributes/external_reference_number"),
            ),
            Some("checkout_session") => (
                json_str(&resource, "/attributes/payment_intent/id"),
                json_str(&resource, "/id"),
            ),
            Some("link") => (
                json_str(&resource, "/id"),
                json_str(&resource, "/attributes/reference_number"),
            ),
            _ => (json_str(&resource, "/id"), None),
        };

        Ok(WebhookEvent {
            provider: ProviderName::Paymongo,
            status: Self::map_event_type(&event_type),
            event_type,
            gateway_key: gateway_key.map(str::to_string),
            secondary_key: secondary_key.map(str::to_string),
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(livemode: bool) -> PaymongoProvider {
        PaymongoProvider::new(PaymongoConfig {
            secret_key: "sk_test_key".to_string(),
            webhook_secret: Some("whsk_test".to_string()),
            livemode,
            ..PaymongoConfig::default()
        })
        .expect("provider init should succeed")
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        hmac_sha256_hex(&signed, secret).expect("hmac should compute")
    }

    #[test]
    fn signature_header_parsing() {
        let header = SignatureHeader::parse("t=1496734173,te=abc123,li=");
        assert_eq!(header.timestamp, Some(1496734173));
        assert_eq!(header.test_signature.as_deref(), Some("abc123"));
        assert_eq!(header.live_signature, None);
    }

    #[test]
    fn test_mode_signature_is_accepted() {
        let provider = provider(false);
        let payload = br#"{"data":{"attributes":{"type":"payment.paid"}}}"#;
        let now = chrono::Utc::now().timestamp();
        let header = format!("t={},te={},li=", now, sign(payload, "whsk_test", now));
        let result = provider.verify_webhook(payload, &header).unwrap();
        assert!(result.valid, "{:?}", result.reason);
    }

    #[test]
    fn live_mode_ignores_test_signature() {
        let provider = provider(true);
        let payload = br#"{"data":{}}"#;
        let now = chrono::Utc::now().timestamp();
        let header = format!("t={},te={},li=", now, sign(payload, "whsk_test", now));
        assert!(!provider.verify_webhook(payload, &header).unwrap().valid);
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let provider = provider(false);
        let payload = br#"{"data":{}}"#;
        let old = chrono::Utc::now().timestamp() - 3600;
        let header = format!("t={},te={}", old, sign(payload, "whsk_test", old));
        assert!(!provider.verify_webhook(payload, &header).unwrap().valid);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let provider = provider(false);
        let now = chrono::Utc::now().timestamp();
        let signature = sign(br#"{"amount":15000}"#, "whsk_test", now);
        let header = format!("t={},te={}", now, signature);
        assert!(!provider
            .verify_webhook(br#"{"amount":1}"#, &header)
            .unwrap()
            .valid);
    }

    #[test]
    fn payment_paid_event_is_keyed_by_intent() {
        let provider = provider(false);
        let payload = serde_json::json!({
            "data": {
                "id": "evt_1",
                "type": "event",
                "attributes": {
                    "type": "payment.paid",
                    "livemode": false,
                    "data": {
                        "id": "pay_1",
                        "type": "payment",
                        "attributes": {
                            "amount": 15000,
                            "status": "paid",
                            "payment_intent_id": "pi_123",
                            "external_reference_number": "ORD-20261019-AAAA-1"
                        }
                    }
                }
            }
        });
        let event = provider
            .parse_webhook_event(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(event.status, GatewayStatus::Paid);
        assert_eq!(event.gateway_key.as_deref(), Some("pi_123"));
        assert_eq!(event.secondary_key.as_deref(), Some("ORD-20261019-AAAA-1"));
    }

    #[test]
    fn checkout_session_event_carries_session_id() {
        let provider = provider(false);
        let payload = serde_json::json!({
            "data": {
                "attributes": {
                    "type": "checkout_session.payment.paid",
                    "data": {
                        "id": "cs_9",
                        "type": "checkout_session",
                        "attributes": { "payment_intent": { "id": "pi_9" } }
                    }
                }
            }
        });
        let event = provider
            .parse_webhook_event(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(event.gateway_key.as_deref(), Some("pi_9"));
        assert_eq!(event.secondary_key.as_deref(), Some("cs_9"));
    }

    #[test]
    fn unrecognised_event_is_unknown() {
        let provider = provider(false);
        let payload = br#"{"data":{"attributes":{"type":"source.chargeable","data":{"id":"src_1","type":"source"}}}}"#;
        let event = provider.parse_webhook_event(payload).unwrap();
        assert_eq!(event.status, GatewayStatus::Unknown);
    }

    #[test]
    fn intent_status_mapping() {
        assert_eq!(
            PaymongoProvider::map_intent_status("succeeded"),
            GatewayStatus::Paid
        );
        assert_eq!(
            PaymongoProvider::map_intent_status("awaiting_payment_method"),
            GatewayStatus::Pending
        );
        assert_eq!(
            PaymongoProvider::map_intent_status("something_new"),
            GatewayStatus::Unknown
        );
    }
}
