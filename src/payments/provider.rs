use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CreateIntentRequest, IntentHandle, ProviderName, StatusReport, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;
use std::time::Duration;

/// Capability set shared by every digital payment provider. The reconciliation
/// engine only talks to providers through this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a provider-side payment handle. Network failures surface as
    /// `GatewayUnavailable`; nothing here touches local state.
    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<IntentHandle>;

    /// Current provider-side status of an intent. Payloads that cannot be
    /// interpreted come back as `GatewayStatus::Unknown` rather than an error.
    async fn poll_status(&self, intent_id: &str) -> PaymentResult<StatusReport>;

    fn name(&self) -> ProviderName;

    /// Longest a single provider call may take, retries included. Callers
    /// bound their wait on the provider with this.
    fn request_deadline(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Header carrying the provider's webhook credential.
    fn signature_header(&self) -> &'static str;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{CustomerContact, GatewayStatus, Money};
    use bigdecimal::BigDecimal;

    struct EchoGateway;

    #[async_trait]
    impl PaymentGateway for EchoGateway {
        async fn create_intent(
            &self,
            request: CreateIntentRequest,
        ) -> PaymentResult<IntentHandle> {
            Ok(IntentHandle {
                intent_id: format!("pi_{}", request.reference),
                link_id: None,
                external_reference: request.reference,
                payment_url: "https://example.com/pay".to_string(),
                provider_data: None,
            })
        }

        async fn poll_status(&self, _intent_id: &str) -> PaymentResult<StatusReport> {
            Ok(StatusReport {
                status: GatewayStatus::Paid,
                provider_status: Some("succeeded".to_string()),
                provider_data: None,
            })
        }

        fn name(&self) -> ProviderName {
            ProviderName::Paymongo
        }

        fn signature_header(&self) -> &'static str {
            "x-echo-signature"
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> PaymentResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult::accepted())
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookEvent> {
            Ok(WebhookEvent {
                provider: ProviderName::Paymongo,
                event_type: "payment.paid".to_string(),
                gateway_key: Some("pi_1".to_string()),
                secondary_key: None,
                status: GatewayStatus::Paid,
                payload: serde_json::json!({}),
                received_at: chrono::Utc::now().to_rfc3339(),
            })
        }
    }

    #[tokio::test]
    async fn trait_objects_can_create_and_poll() {
        let gateway: Box<dyn PaymentGateway> = Box::new(EchoGateway);
        let handle = gateway
            .create_intent(CreateIntentRequest {
                amount: Money::new(BigDecimal::from(150), "PHP"),
                reference: "ORD-1".to_string(),
                description: "Order ORD-1".to_string(),
                customer: CustomerContact::default(),
                success_url: None,
                failure_url: None,
                metadata: None,
            })
            .await
            .expect("create should succeed");
        assert_eq!(handle.intent_id, "pi_ORD-1");

        let report = gateway
            .poll_status(&handle.intent_id)
            .await
            .expect("poll should succeed");
        assert_eq!(report.status, GatewayStatus::Paid);
        assert_eq!(gateway.name(), ProviderName::Paymongo);
    }
}
