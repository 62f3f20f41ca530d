use crate::app::storefront_service::StorefrontService;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StorefrontService>,
    /// When set, webhook bodies must carry a matching `X-Webhook-Signature`.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<StorefrontService>, webhook_secret: Option<String>) -> Self {
        Self {
            service,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: JsonValue) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterAccountRequest {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// If true, an existing account is a 409 instead of being returned.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CreditRequest {
    /// Minor units. Integers or numeric strings.
    #[schema(value_type = Object)]
    pub amount: JsonValue,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct PurchaseRequest {
    pub product_id: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CreateIntentRequest {
    pub user_id: String,
    /// Minor units. Integers or numeric strings.
    #[schema(value_type = Object)]
    pub amount: JsonValue,
    pub provider: String,
}

/// Provider notification body. `payment_id` may also be the provider's own reference.
#[derive(Deserialize, Debug, ToSchema)]
pub struct WebhookPayload {
    pub payment_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub amount: JsonValue,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub account_ref: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct AddFavoriteRequest {
    /// Absent or empty is a 400, like a duplicate.
    #[serde(default)]
    pub product_id: Option<String>,
}

pub fn json_422(err: JsonRejection, expected: &str) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiResponse::err(format!(
            "Invalid JSON body: {} (expected: {})",
            err, expected
        ))),
    )
}
