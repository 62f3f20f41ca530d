use crate::domain::error::LedgerError;
use crate::transport::http::types::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidAmount(_) | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::InsufficientFunds { .. } | LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
        LedgerError::Upstream(_) => StatusCode::BAD_GATEWAY,
        LedgerError::AnomalyAcknowledged(_) => StatusCode::OK,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = match &self {
            LedgerError::InsufficientFunds { balance, requested } => ApiResponse {
                success: false,
                data: Some(serde_json::json!({ "balance": balance, "requested": requested })),
                error: Some(self.to_string()),
            },
            // Storage details stay in the logs.
            LedgerError::Storage(_) => ApiResponse::err("internal storage error"),
            _ => ApiResponse::err(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// 200 with `data` set to the serialized value.
pub fn ok_json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => LedgerError::Storage(anyhow::Error::new(e)).into_response(),
    }
}
