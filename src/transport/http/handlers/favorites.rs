use crate::transport::http::handlers::common::ok_json;
use crate::transport::http::types::{json_422, AddFavoriteRequest, AppState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

#[utoipa::path(
    get,
    path = "/api/favorites/{user_id}",
    params(("user_id" = String, Path, description = "External user id")),
    responses(
        (status = 200, description = "Favorite product ids in insertion order", body = ApiResponse)
    )
)]
pub async fn list_favorites_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.service.favorites.list(&user_id).await {
        Ok(ids) => ok_json(&ids),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/favorites/{user_id}",
    params(("user_id" = String, Path, description = "External user id")),
    request_body = AddFavoriteRequest,
    responses(
        (status = 201, description = "Added; body holds the updated list", body = ApiResponse),
        (
            status = 400,
            description = "Missing product id, or already a favorite",
            body = ApiResponse
        ),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn add_favorite_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    request: Result<Json<AddFavoriteRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return json_422(e, r#"{"product_id": "..."}"#).into_response(),
    };
    let product_id = request.product_id.unwrap_or_default();
    let favorites = &state.service.favorites;
    if let Err(e) = favorites.add(&user_id, &product_id, Utc::now()).await {
        return e.into_response();
    }
    match favorites.list(&user_id).await {
        Ok(ids) => (StatusCode::CREATED, ok_json(&ids)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/api/favorites/{user_id}/{product_id}",
    params(
        ("user_id" = String, Path, description = "External user id"),
        ("product_id" = String, Path, description = "Catalog product id")
    ),
    responses(
        (status = 200, description = "Removed", body = ApiResponse),
        (status = 404, description = "Not a favorite", body = ApiResponse)
    )
)]
pub async fn remove_favorite_handler(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let favorites = &state.service.favorites;
    if let Err(e) = favorites.remove(&user_id, &product_id).await {
        return e.into_response();
    }
    match favorites.list(&user_id).await {
        Ok(ids) => ok_json(&ids),
        Err(e) => e.into_response(),
    }
}
