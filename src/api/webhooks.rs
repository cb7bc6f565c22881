use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use crate::api::{tag_request_id, AppState};
use crate::error::AppError;
use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessorError};

/// POST /payments/webhook/{provider}
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(provider = %provider, bytes = body.len(), "Received webhook");
    let result = state
        .webhooks
        .process_webhook(&provider, &headers, &body)
        .await;
    respond(&headers, result)
}

/// POST /payments/webhook
pub async fn handle_detected_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(bytes = body.len(), "Received webhook");
    let result = state.webhooks.process_detected(&headers, &body).await;
    respond(&headers, result)
}

fn respond(
    headers: &HeaderMap,
    result: Result<WebhookOutcome, WebhookProcessorError>,
) -> Response {
    match result {
        Ok(outcome) => {
            if let WebhookOutcome::Ignored(reason) = &outcome {
                info!(reason = %reason, "Webhook acknowledged without changes");
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": outcome.as_str() })),
            )
                .into_response()
        }
        Err(e) => {
            match &e {
                WebhookProcessorError::StoreUnavailable(_) => {
                    error!(error = %e, "Webhook processing failed")
                }
                _ => warn!(error = %e, "Rejected webhook"),
            }
            tag_request_id(headers)(AppError::from(e)).into_response()
        }
    }
}
