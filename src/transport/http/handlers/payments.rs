use crate::crypto::signature;
use crate::domain::model::parse_amount;
use crate::domain::payment::{WebhookNotice, WebhookOutcome};
use crate::transport::http::handlers::common::ok_json;
use crate::transport::http::types::{
    json_422, ApiResponse, AppState, CreateIntentRequest, WebhookPayload,
};
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[utoipa::path(
    post,
    path = "/api/payments/intents",
    request_body = CreateIntentRequest,
    responses(
        (
            status = 200,
            description = "Pending intent with provider redirect URL",
            body = ApiResponse
        ),
        (status = 400, description = "Invalid amount or unknown provider", body = ApiResponse),
        (status = 404, description = "Unknown account", body = ApiResponse),
        (
            status = 422,
            description = "Unprocessable entity (invalid JSON body)",
            body = ApiResponse
        ),
        (
            status = 502,
            description = "Provider failed or timed out; intent left pending",
            body = ApiResponse
        )
    )
)]
pub async fn create_intent_handler(
    State(state): State<AppState>,
    request: Result<Json<CreateIntentRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => {
            return json_422(e, r#"{"user_id": "...", "amount": 500, "provider": "..."}"#)
                .into_response()
        }
    };
    let amount = match parse_amount(&request.amount) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    match state
        .service
        .payments
        .create_intent(&request.user_id, amount, &request.provider, Utc::now())
        .await
    {
        Ok(intent) => ok_json(&intent),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/payments/intents/{payment_id}",
    params(("payment_id" = String, Path, description = "Payment id or provider reference")),
    responses(
        (status = 200, description = "Intent and its status", body = ApiResponse),
        (status = 404, description = "Unknown intent", body = ApiResponse)
    )
)]
pub async fn get_intent_handler(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> impl IntoResponse {
    match state.service.payments.get_intent(&payment_id).await {
        Ok(intent) => ok_json(&intent),
        Err(e) => e.into_response(),
    }
}

/// Provider callback. Every delivery with a valid signature is acknowledged with 200;
/// the body's `data.outcome` says what happened.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body = WebhookPayload,
    responses(
        (
            status = 200,
            description = "Acknowledged (credited, duplicate, declined or anomaly)",
            body = ApiResponse
        ),
        (status = 401, description = "Missing or invalid signature", body = ApiResponse)
    )
)]
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !signature::verify(secret.as_bytes(), &body, provided) {
            warn!("webhook rejected: bad signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::err("invalid webhook signature")),
            )
                .into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "webhook body unreadable; acknowledged");
            return ok_json(&WebhookOutcome::Anomaly {
                reason: format!("unreadable body: {}", e),
            });
        }
    };

    let notice = WebhookNotice {
        payment_id: payload.payment_id,
        reported_amount: parse_amount(&payload.amount).ok(),
        success: payload.success,
        account_ref: payload.account_ref,
    };
    let outcome = state.service.payments.apply_webhook(&notice, Utc::now()).await;
    ok_json(&outcome)
}
