use crate::api::{json_body, tag_request_id, AppState};
use crate::database::models::{Order, OrderWithItems};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::CallerContext;
use crate::services::order_service::PlaceOrderCommand;
use crate::services::state_machine::OrderStatus;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub order_status: String,
}

/// POST /orders
pub async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    payload: Result<Json<PlaceOrderCommand>, JsonRejection>,
) -> AppResult<(StatusCode, Json<OrderWithItems>)> {
    let tag = tag_request_id(&headers);
    let command = json_body(payload).map_err(&tag)?;
    let order = state
        .orders
        .place_order(&caller, command)
        .await
        .map_err(&tag)?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{reference}
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    Path(reference): Path<String>,
) -> AppResult<Json<OrderWithItems>> {
    let order = state
        .orders
        .get_order_by_reference(&caller, &reference)
        .await
        .map_err(tag_request_id(&headers))?;
    Ok(Json(order))
}

/// PATCH /orders/{id}/status (staff)
pub async fn update_order_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    caller: CallerContext,
    Path(order): Path<String>,
    payload: Result<Json<UpdateOrderStatusRequest>, JsonRejection>,
) -> AppResult<Json<Order>> {
    let tag = tag_request_id(&headers);
    let order_id: i64 = order
        .parse()
        .map_err(|_| tag(AppError::invalid_field("id", "order id must be an integer")))?;
    let request = json_body(payload).map_err(&tag)?;
    let target = OrderStatus::from_str(&request.order_status)
        .map_err(|reason| tag(AppError::invalid_field("order_status", reason)))?;

    let updated = state
        .orders
        .update_order_status(&caller, order_id, target)
        .await
        .map_err(&tag)?;
    Ok(Json(updated))
}
