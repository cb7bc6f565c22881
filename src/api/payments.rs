use crate::api::{json_body, tag_request_id, AppState};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::CallerContext;
use crate::services::reconciliation::{
    CashSettlement, CreatePaymentCommand, PaymentAttempt, PaymentState, VerifyLookup,
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use tracing::info;

/// Exactly one identifier must be given.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    pub order_id: Option<i64>,
    pub order_reference: Option<String>,
    pub intent_id: Option<String>,
    pub link_id: Option<String>,
}

impl VerifyRequest {
    pub fn into_lookup(self) -> AppResult<VerifyLookup> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let candidates = [
            self.order_id.map(VerifyLookup::OrderId),
            non_empty(self.order_reference).map(VerifyLookup::OrderReference),
            non_empty(self.intent_id).map(VerifyLookup::IntentId),
            non_empty(self.link_id).map(VerifyLookup::LinkId),
        ];
        let mut given = candidates.into_iter().flatten();

        match (given.next(), given.next()) {
            (Some(lookup), None) => Ok(lookup),
            (None, _) => Err(AppError::invalid_field(
                "order_id",
                "one of order_id, order_reference, intent_id or link_id is required",
            )),
            (Some(_), Some(_)) => Err(AppError::invalid_field(
                "order_id",
                "provide only one of order_id, order_reference, intent_id or link_id",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CashPaymentRequest {
    pub order_id: i64,
    pub amount_tendered: BigDecimal,
}

/// POST /payments/create
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    payload: Result<Json<CreatePaymentCommand>, JsonRejection>,
) -> AppResult<(StatusCode, Json<PaymentAttempt>)> {
    let tag = tag_request_id(&headers);
    let command = json_body(payload).map_err(&tag)?;
    info!(order_id = command.order_id, provider = ?command.provider, "Payment creation requested");

    let attempt = state
        .engine
        .create_payment_attempt(&caller, command)
        .await
        .map_err(&tag)?;

    let status = if attempt.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(attempt)))
}

/// GET /payments/verify
pub async fn verify_payment_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    Query(request): Query<VerifyRequest>,
) -> AppResult<Json<PaymentState>> {
    verify(state, &headers, caller, request).await
}

/// POST /payments/verify
pub async fn verify_payment_body(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> AppResult<Json<PaymentState>> {
    let request = json_body(payload).map_err(tag_request_id(&headers))?;
    verify(state, &headers, caller, request).await
}

async fn verify(
    state: AppState,
    headers: &HeaderMap,
    caller: CallerContext,
    request: VerifyRequest,
) -> AppResult<Json<PaymentState>> {
    let tag = tag_request_id(headers);
    let lookup = request.into_lookup().map_err(&tag)?;
    info!(lookup = %lookup, "Payment verification requested");

    let result = state
        .engine
        .verify_payment(&caller, lookup)
        .await
        .map_err(&tag)?;
    Ok(Json(result))
}

/// POST /payments/cash (staff)
pub async fn record_cash_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    payload: Result<Json<CashPaymentRequest>, JsonRejection>,
) -> AppResult<Json<CashSettlement>> {
    let tag = tag_request_id(&headers);
    let request = json_body(payload).map_err(&tag)?;

    let settlement = state
        .engine
        .record_cash_payment(&caller, request.order_id, request.amount_tendered)
        .await
        .map_err(&tag)?;
    Ok(Json(settlement))
}
