// src/bin/api_server.rs

use axum::http::HeaderValue;
use std::sync::Arc;
use storefront_ledger::infra::logging::init_logging;
use storefront_ledger::transport;
use storefront_ledger::{Config, StorefrontService};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin.trim() == "*" {
        return Ok(cors.allow_origin(Any));
    }
    let origin = HeaderValue::from_str(origin.trim())
        .map_err(|e| anyhow::anyhow!("CORS_ORIGIN is not a valid header value: {}", e))?;
    Ok(cors.allow_origin(origin))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = Config::from_env()?;

    // --- Service Initialization ---
    info!("initializing storefront service");
    let service = StorefrontService::connect(&config).await?;
    if config.payment_providers.is_empty() {
        warn!("PAYMENT_PROVIDERS is empty; payment intents will be rejected");
    }
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set; webhook signatures are not checked");
    }
    let app_state =
        transport::http::AppState::new(Arc::new(service), config.webhook_secret.clone());

    // --- API Server Initialization ---
    let app = transport::http::create_router(app_state)
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()),
        )
        .layer(cors_layer(&config.cors_origin)?);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "API server listening");
    info!("Swagger UI available at /swagger-ui");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received (Ctrl+C)");
        }
    }

    Ok(())
}
