use crate::domain::history::EntitledEntry;
use crate::domain::model::parse_amount;
use crate::transport::http::handlers::common::ok_json;
use crate::transport::http::types::{json_422, AppState, CreditRequest, RegisterAccountRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

#[utoipa::path(
    post,
    path = "/api/accounts",
    request_body = RegisterAccountRequest,
    responses(
        (status = 200, description = "Account created or already present", body = ApiResponse),
        (status = 400, description = "Malformed user id", body = ApiResponse),
        (status = 409, description = "Account exists (strict registration)", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn register_account_handler(
    State(state): State<AppState>,
    request: Result<Json<RegisterAccountRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => {
            return json_422(e, r#"{"user_id": "...", "display_name": "...", "strict": false}"#)
                .into_response()
        }
    };
    let accounts = &state.service.accounts;
    let display_name = request.display_name.as_deref();
    let result = if request.strict {
        accounts
            .register_account(&request.user_id, display_name, Utc::now())
            .await
    } else {
        accounts
            .ensure_account(&request.user_id, display_name, Utc::now())
            .await
    };
    match result {
        Ok(account) => ok_json(&account),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{user_id}",
    params(("user_id" = String, Path, description = "External user id")),
    responses(
        (status = 200, description = "Account record", body = ApiResponse),
        (status = 404, description = "Unknown account", body = ApiResponse)
    )
)]
pub async fn get_account_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.service.accounts.get_account(&user_id).await {
        Ok(account) => ok_json(&account),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{user_id}/balance",
    params(("user_id" = String, Path, description = "External user id")),
    responses(
        (status = 200, description = "Current balance in minor units", body = ApiResponse),
        (status = 404, description = "Unknown account", body = ApiResponse)
    )
)]
pub async fn balance_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.service.ledger.balance(&user_id).await {
        Ok(balance) => ok_json(&serde_json::json!({ "user_id": user_id, "balance": balance })),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/accounts/{user_id}/credit",
    params(("user_id" = String, Path, description = "External user id")),
    request_body = CreditRequest,
    responses(
        (status = 200, description = "Balance credited", body = ApiResponse),
        (status = 400, description = "Invalid amount", body = ApiResponse),
        (status = 404, description = "Unknown account", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn credit_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    request: Result<Json<CreditRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return json_422(e, r#"{"amount": 150}"#).into_response(),
    };
    let amount = match parse_amount(&request.amount) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    match state.service.ledger.credit(&user_id, amount, Utc::now()).await {
        Ok(balance) => ok_json(&serde_json::json!({ "user_id": user_id, "balance": balance })),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{user_id}/transactions",
    params(("user_id" = String, Path, description = "External user id")),
    responses(
        (status = 200, description = "Balance mutations, newest first", body = ApiResponse),
        (status = 404, description = "Unknown account", body = ApiResponse)
    )
)]
pub async fn transactions_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.service.ledger.transactions(&user_id).await {
        Ok(txs) => ok_json(&txs),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{user_id}/history",
    params(("user_id" = String, Path, description = "External user id")),
    responses(
        (
            status = 200,
            description = "History with expired/days_left per entry, oldest first",
            body = ApiResponse
        ),
        (status = 404, description = "Unknown account", body = ApiResponse)
    )
)]
pub async fn history_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let service = &state.service;
    match service
        .journal
        .list_for_account(&user_id, Utc::now(), service.entitlements.window())
        .await
    {
        Ok(listing) => {
            let entries: Vec<EntitledEntry> = listing.iter().collect();
            ok_json(&entries)
        }
        Err(e) => e.into_response(),
    }
}
