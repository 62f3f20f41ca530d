use crate::transport::http::handlers::{accounts, favorites, health, payments, purchases};
use crate::transport::http::types::{
    AddFavoriteRequest, ApiResponse, AppState, CreateIntentRequest, CreditRequest,
    PurchaseRequest, RegisterAccountRequest, WebhookPayload,
};
use axum::routing::{delete, get, post};
use axum::Router;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthcheck_handler,
        accounts::register_account_handler,
        accounts::get_account_handler,
        accounts::balance_handler,
        accounts::credit_handler,
        accounts::transactions_handler,
        accounts::history_handler,
        purchases::purchase_handler,
        purchases::download_handler,
        payments::create_intent_handler,
        payments::get_intent_handler,
        payments::webhook_handler,
        favorites::list_favorites_handler,
        favorites::add_favorite_handler,
        favorites::remove_favorite_handler
    ),
    components(schemas(
        ApiResponse,
        RegisterAccountRequest,
        CreditRequest,
        PurchaseRequest,
        CreateIntentRequest,
        WebhookPayload,
        AddFavoriteRequest
    ))
)]
pub struct ApiDoc;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::healthcheck_handler))
        .route("/api/accounts", post(accounts::register_account_handler))
        .route("/api/accounts/:user_id", get(accounts::get_account_handler))
        .route("/api/accounts/:user_id/balance", get(accounts::balance_handler))
        .route("/api/accounts/:user_id/credit", post(accounts::credit_handler))
        .route(
            "/api/accounts/:user_id/transactions",
            get(accounts::transactions_handler),
        )
        .route("/api/accounts/:user_id/history", get(accounts::history_handler))
        .route(
            "/api/accounts/:user_id/purchases",
            post(purchases::purchase_handler),
        )
        .route(
            "/api/accounts/:user_id/products/:product_id/download",
            get(purchases::download_handler),
        )
        .route("/api/payments/intents", post(payments::create_intent_handler))
        .route(
            "/api/payments/intents/:payment_id",
            get(payments::get_intent_handler),
        )
        .route("/api/payments/webhook", post(payments::webhook_handler))
        .route(
            "/api/favorites/:user_id",
            get(favorites::list_favorites_handler).post(favorites::add_favorite_handler),
        )
        .route(
            "/api/favorites/:user_id/:product_id",
            delete(favorites::remove_favorite_handler),
        )
        .with_state(app_state)
}
