use crate::transport::http::handlers::common::ok_json;
use crate::transport::http::types::{json_422, AppState, PurchaseRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

#[utoipa::path(
    post,
    path = "/api/accounts/{user_id}/purchases",
    params(("user_id" = String, Path, description = "External user id")),
    request_body = PurchaseRequest,
    responses(
        (
            status = 200,
            description = "Purchased; balance debited and history recorded",
            body = ApiResponse
        ),
        (status = 400, description = "Product is not purchasable", body = ApiResponse),
        (status = 403, description = "Insufficient funds", body = ApiResponse),
        (status = 404, description = "Unknown account or product", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn purchase_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    request: Result<Json<PurchaseRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return json_422(e, r#"{"product_id": "..."}"#).into_response(),
    };
    match state
        .service
        .purchases
        .buy(&user_id, &request.product_id, Utc::now())
        .await
    {
        Ok(receipt) => ok_json(&receipt),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/accounts/{user_id}/products/{product_id}/download",
    params(
        ("user_id" = String, Path, description = "External user id"),
        ("product_id" = String, Path, description = "Catalog product id")
    ),
    responses(
        (status = 200, description = "Download granted and recorded", body = ApiResponse),
        (status = 403, description = "Not purchased, or purchase expired", body = ApiResponse),
        (status = 404, description = "Unknown product or no file", body = ApiResponse)
    )
)]
pub async fn download_handler(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state
        .service
        .entitlements
        .check_access(&user_id, &product_id, Utc::now())
        .await
    {
        Ok(grant) => ok_json(&grant),
        Err(e) => e.into_response(),
    }
}
