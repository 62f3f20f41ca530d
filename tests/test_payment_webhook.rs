//! Payment flow over HTTP with a stub provider:
//! 1) Create an intent; the provider stub returns an invoice reference and redirect URL.
//! 2) Deliver the signed webhook twice; the balance is credited once.
//! 3) Bad signatures are rejected before anything is applied.
//! 4) A failing provider leaves the intent pending and the balance untouched.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storefront_ledger::crypto::signature;
use storefront_ledger::infra::provider::HttpPaymentProvider;
use storefront_ledger::transport;
use storefront_ledger::{InMemoryCatalog, StorefrontService};

const SECRET: &str = "whsec_test";

async fn spawn(router: Router) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Ok(addr)
}

/// Stub provider: `/ok` issues invoices, `/down` always fails.
async fn spawn_provider(calls: Arc<AtomicUsize>) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let router = Router::new()
        .route(
            "/ok",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let key = headers
                        .get("idempotency-key")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    assert_eq!(body["payment_id"].as_str(), Some(key.as_str()));
                    Json(json!({
                        "provider_ref": format!("inv_{}", key),
                        "redirect_url": format!("https://pay.example/checkout/{}", key),
                    }))
                }
            }),
        )
        .route(
            "/down",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
    spawn(router).await
}

async fn spawn_storefront(
    provider_addr: SocketAddr,
) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let endpoints = HashMap::from([
        ("stub".to_string(), format!("http://{}/ok", provider_addr)),
        ("broken".to_string(), format!("http://{}/down", provider_addr)),
    ]);
    let provider = HttpPaymentProvider::new(reqwest::Client::new(), endpoints);
    let service =
        StorefrontService::in_memory(Arc::new(InMemoryCatalog::new()), Arc::new(provider));
    let state = transport::http::AppState::new(Arc::new(service), Some(SECRET.to_string()));
    spawn(transport::http::create_router(state)).await
}

async fn deliver(
    client: &reqwest::Client,
    base: &str,
    body: &Value,
    secret: &str,
) -> Result<reqwest::Response, reqwest::Error> {
    let raw = serde_json::to_vec(body).unwrap_or_default();
    client
        .post(format!("{}/api/payments/webhook", base))
        .header("content-type", "application/json")
        .header("X-Webhook-Signature", signature::sign(secret.as_bytes(), &raw))
        .body(raw)
        .send()
        .await
}

async fn balance(client: &reqwest::Client, base: &str, user: &str) -> Result<i64, reqwest::Error> {
    let body = client
        .get(format!("{}/api/accounts/{}/balance", base, user))
        .send()
        .await?
        .json::<Value>()
        .await?;
    Ok(body["data"]["balance"].as_i64().unwrap_or(-1))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_credits_once() -> Result<(), Box<dyn std::error::Error>> {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider_addr = spawn_provider(calls.clone()).await?;
    let base = format!("http://{}", spawn_storefront(provider_addr).await?);
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/accounts", base))
        .json(&json!({ "user_id": "u1" }))
        .send()
        .await?;

    let intent = client
        .post(format!("{}/api/payments/intents", base))
        .json(&json!({ "user_id": "u1", "amount": 500, "provider": "stub" }))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(intent["success"], true, "{}", intent);
    assert_eq!(intent["data"]["status"], "pending");
    let payment_id = intent["data"]["payment_id"].as_str().unwrap_or_default().to_string();
    assert!(!payment_id.is_empty());
    assert_eq!(
        intent["data"]["provider_ref"].as_str(),
        Some(format!("inv_{}", payment_id).as_str())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let notice = json!({
        "payment_id": payment_id,
        "amount": 500,
        "success": true,
        "account_ref": "u1"
    });

    // Wrong secret: rejected, nothing applied.
    let forged = deliver(&client, &base, &notice, "not-the-secret").await?;
    assert_eq!(forged.status(), 401);
    assert_eq!(balance(&client, &base, "u1").await?, 0);

    let first = deliver(&client, &base, &notice, SECRET).await?;
    assert_eq!(first.status(), 200);
    let first = first.json::<Value>().await?;
    assert_eq!(first["data"]["outcome"], "credited");
    assert_eq!(first["data"]["balance"], 500);

    let second = deliver(&client, &base, &notice, SECRET).await?;
    assert_eq!(second.status(), 200);
    assert_eq!(second.json::<Value>().await?["data"]["outcome"], "already_applied");
    assert_eq!(balance(&client, &base, "u1").await?, 500);

    let polled = client
        .get(format!("{}/api/payments/intents/{}", base, payment_id))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(polled["data"]["status"], "succeeded");

    let txs = client
        .get(format!("{}/api/accounts/u1/transactions", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    let txs = txs["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0]["reason"], "payment");
    assert_eq!(txs[0]["reference"], payment_id.as_str());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_anomalies_are_acknowledged() -> Result<(), Box<dyn std::error::Error>> {
    let provider_addr = spawn_provider(Arc::new(AtomicUsize::new(0))).await?;
    let base = format!("http://{}", spawn_storefront(provider_addr).await?);
    let client = reqwest::Client::new();

    let unknown = deliver(
        &client,
        &base,
        &json!({ "payment_id": "does-not-exist", "amount": 100, "success": true }),
        SECRET,
    )
    .await?;
    assert_eq!(unknown.status(), 200);
    assert_eq!(unknown.json::<Value>().await?["data"]["outcome"], "anomaly");

    // Signed but unparseable bodies are acknowledged too.
    let raw = b"{\"payment_id\":".to_vec();
    let garbled = client
        .post(format!("{}/api/payments/webhook", base))
        .header("X-Webhook-Signature", signature::sign(SECRET.as_bytes(), &raw))
        .body(raw)
        .send()
        .await?;
    assert_eq!(garbled.status(), 200);

    let unsigned = client
        .post(format!("{}/api/payments/webhook", base))
        .json(&json!({ "payment_id": "x", "amount": 1, "success": true }))
        .send()
        .await?;
    assert_eq!(unsigned.status(), 401);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_provider_failure_leaves_balance_untouched(
) -> Result<(), Box<dyn std::error::Error>> {
    let provider_addr = spawn_provider(Arc::new(AtomicUsize::new(0))).await?;
    let base = format!("http://{}", spawn_storefront(provider_addr).await?);
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/accounts", base))
        .json(&json!({ "user_id": "u1" }))
        .send()
        .await?;

    let failed = client
        .post(format!("{}/api/payments/intents", base))
        .json(&json!({ "user_id": "u1", "amount": 500, "provider": "broken" }))
        .send()
        .await?;
    assert_eq!(failed.status(), 502);

    let unknown_provider = client
        .post(format!("{}/api/payments/intents", base))
        .json(&json!({ "user_id": "u1", "amount": 500, "provider": "nope" }))
        .send()
        .await?;
    assert_eq!(unknown_provider.status(), 400);

    let unknown_account = client
        .post(format!("{}/api/payments/intents", base))
        .json(&json!({ "user_id": "ghost", "amount": 500, "provider": "stub" }))
        .send()
        .await?;
    assert_eq!(unknown_account.status(), 404);

    assert_eq!(balance(&client, &base, "u1").await?, 0);
    Ok(())
}
