//! Shared fixtures: a scripted gateway, an in-memory app and order helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::json;
use sipline_backend::api::{self, AppState};
use sipline_backend::config::{AuthConfig, OrdersConfig, PaymentsConfig};
use sipline_backend::database::models::{NewOrder, Order};
use sipline_backend::database::{InMemoryStore, OrderPaymentStore};
use sipline_backend::health::HealthChecker;
use sipline_backend::middleware::auth::TokenVerifier;
use sipline_backend::payments::{
    CreateIntentRequest, GatewayStatus, IntentHandle, PaymentError, PaymentGateway,
    PaymentProviderFactory, PaymentResult, ProviderName, StatusReport, WebhookEvent,
    WebhookVerificationResult,
};
use sipline_backend::services::{OrderService, ReconciliationEngine, WebhookProcessor};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_SIGNATURE_HEADER: &str = "x-scripted-signature";
pub const TEST_SIGNATURE: &str = "scripted-secret";
pub const JWT_SECRET: &str = "integration-test-secret-with-enough-bytes";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// Gateway double whose poll answer is set by the test. Counts every call.
pub struct ScriptedGateway {
    name: ProviderName,
    poll_answer: Mutex<GatewayStatus>,
    fail_create: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    pub creates: AtomicUsize,
    pub polls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(name: ProviderName) -> Arc<Self> {
        Arc::new(Self {
            name,
            poll_answer: Mutex::new(GatewayStatus::Pending),
            fail_create: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            creates: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn answer_polls_with(&self, status: GatewayStatus) {
        *self.poll_answer.lock().unwrap() = status;
    }

    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_intent(&self, request: CreateIntentRequest) -> PaymentResult<IntentHandle> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::GatewayUnavailable {
                provider: self.name.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let id = Uuid::new_v4().simple().to_string();
        Ok(IntentHandle {
            intent_id: format!("pi_{}", id),
            link_id: Some(format!("cs_{}", id)),
            external_reference: request.reference,
            payment_url: format!("https://pay.example.com/{}", id),
            provider_data: Some(json!({ "id": id })),
        })
    }

    async fn poll_status(&self, _intent_id: &str) -> PaymentResult<StatusReport> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let status = *self.poll_answer.lock().unwrap();
        Ok(StatusReport {
            status,
            provider_status: Some(status.as_str().to_string()),
            provider_data: None,
        })
    }

    fn name(&self) -> ProviderName {
        self.name
    }

    fn request_deadline(&self) -> Duration {
        Duration::from_millis(200)
    }

    fn signature_header(&self) -> &'static str {
        TEST_SIGNATURE_HEADER
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        Ok(if signature == TEST_SIGNATURE {
            WebhookVerificationResult::accepted()
        } else {
            WebhookVerificationResult::rejected("bad scripted signature")
        })
    }

    /// Expects `{"type": ..., "key": ..., "status": "paid" | "failed" | ...}`.
    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: None,
            })?;
        let status = match parsed["status"].as_str() {
            Some("paid") => GatewayStatus::Paid,
            Some("failed") => GatewayStatus::Failed,
            Some("pending") => GatewayStatus::Pending,
            _ => GatewayStatus::Unknown,
        };
        Ok(WebhookEvent {
            provider: self.name,
            event_type: parsed["type"].as_str().unwrap_or("unknown").to_string(),
            gateway_key: parsed["key"].as_str().map(str::to_string),
            secondary_key: parsed["reference"].as_str().map(str::to_string),
            status,
            payload: parsed.clone(),
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub verifier: Arc<TokenVerifier>,
    pub state: AppState,
}

impl TestApp {
    pub fn new(gateways: Vec<Arc<dyn PaymentGateway>>) -> Self {
        let default_provider = gateways
            .first()
            .map(|g| g.name())
            .unwrap_or(ProviderName::Paymongo);
        let store = Arc::new(InMemoryStore::new());
        let dyn_store: Arc<dyn OrderPaymentStore> = store.clone();
        let factory = Arc::new(PaymentProviderFactory::with_gateways(default_provider, gateways));
        let engine = Arc::new(ReconciliationEngine::new(
            dyn_store.clone(),
            factory.clone(),
            PaymentsConfig::default(),
        ));
        let verifier = Arc::new(TokenVerifier::new(&AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
            jwt_issuer: Some("sipline".to_string()),
        }));
        let state = AppState {
            engine: engine.clone(),
            orders: Arc::new(OrderService::new(dyn_store.clone(), OrdersConfig::default())),
            webhooks: Arc::new(WebhookProcessor::new(factory.clone(), engine.clone())),
            health_checker: HealthChecker::new(dyn_store, factory),
            token_verifier: verifier.clone(),
        };
        Self {
            store,
            engine,
            verifier,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        api::router(self.state.clone())
    }

    pub fn bearer(&self, user_id: Uuid, role: &str) -> String {
        let token = self
            .verifier
            .issue(user_id, role, chrono::Duration::hours(1))
            .unwrap();
        format!("Bearer {}", token)
    }

    /// Inserts an order directly; `owner` of `None` makes it a guest order.
    pub async fn order(&self, total: &str, owner: Option<Uuid>) -> Order {
        let reference = format!(
            "ORD-20261019-{}",
            Uuid::new_v4().simple().to_string()[..8].to_uppercase()
        );
        self.store
            .create_order(NewOrder {
                reference,
                user_id: owner,
                guest: None,
                branch: "Main".to_string(),
                subtotal: dec(total),
                tax: dec("0"),
                total: dec(total),
                items: Vec::new(),
            })
            .await
            .unwrap()
            .order
    }
}
