//! HTTP surface: router, shared state and the health probes.

pub mod orders;
pub mod payments;
pub mod webhooks;

use crate::error::AppError;
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::auth::TokenVerifier;
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{OrderService, ReconciliationEngine, WebhookProcessor};
use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub orders: Arc<OrderService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub health_checker: HealthChecker,
    pub token_verifier: Arc<TokenVerifier>,
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.token_verifier.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/payments/create", post(payments::create_payment))
        .route(
            "/payments/verify",
            get(payments::verify_payment_query).post(payments::verify_payment_body),
        )
        .route("/payments/cash", post(payments::record_cash_payment))
        .route("/payments/webhook", post(webhooks::handle_detected_webhook))
        .route("/payments/webhook/{provider}", post(webhooks::handle_webhook))
        .route("/orders", post(orders::place_order))
        .route("/orders/{order}", get(orders::get_order))
        .route("/orders/{order}/status", patch(orders::update_order_status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Tags an error with the request id so it appears in the JSON body.
pub(crate) fn tag_request_id(headers: &HeaderMap) -> impl Fn(AppError) -> AppError {
    let request_id = get_request_id_from_headers(headers);
    move |err| match &request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    }
}

/// Unwraps a JSON body, turning axum's plain-text rejection into the
/// standard error body.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::invalid_field("body", rejection.body_text()))
}

async fn root() -> &'static str {
    "Sipline order and payment service"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - the store must answer before traffic is routed here
async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let result = health(state).await;
    if result.is_err() {
        error!("Readiness check failed");
    }
    result
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    info!("Liveness probe requested");
    "OK"
}
