//! End-to-end purchase flow over HTTP against the in-memory store:
//! 1) Register an account.
//! 2) Buy with an empty balance (403), top up, buy again (200).
//! 3) Download the purchase, check history and the transaction journal.
//! 4) Free products and favorites.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use storefront_ledger::infra::provider::{PaymentProvider, RemoteIntent, RemoteIntentRequest};
use storefront_ledger::transport;
use storefront_ledger::{InMemoryCatalog, Product, StorefrontService};

struct NoProviders;

#[async_trait::async_trait]
impl PaymentProvider for NoProviders {
    fn supports(&self, _provider: &str) -> bool {
        false
    }

    async fn create_remote_intent(
        &self,
        _request: &RemoteIntentRequest<'_>,
    ) -> anyhow::Result<RemoteIntent> {
        Err(anyhow::anyhow!("no providers"))
    }
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::with_products([
        Product {
            id: "p1".into(),
            name: "Field Guide".into(),
            price: 100,
            file: Some("field-guide.pdf".into()),
        },
        Product {
            id: "free".into(),
            name: "Sampler".into(),
            price: 0,
            file: Some("sampler.zip".into()),
        },
    ])
}

async fn spawn_server() -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let service = StorefrontService::in_memory(Arc::new(catalog()), Arc::new(NoProviders));
    let state = transport::http::AppState::new(Arc::new(service), None);
    let router = transport::http::create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Ok(addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_purchase_flow() -> Result<(), Box<dyn std::error::Error>> {
    let addr = spawn_server().await?;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", base)).send().await?;
    assert_eq!(health.status(), 200);

    let register = client
        .post(format!("{}/api/accounts", base))
        .json(&json!({ "user_id": "u1", "display_name": "Ann" }))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(register["success"], true);
    assert_eq!(register["data"]["balance"], 0);

    // Strict re-registration conflicts; lenient one is idempotent.
    let strict = client
        .post(format!("{}/api/accounts", base))
        .json(&json!({ "user_id": "u1", "strict": true }))
        .send()
        .await?;
    assert_eq!(strict.status(), 409);

    // Not enough money yet.
    let buy = client
        .post(format!("{}/api/accounts/u1/purchases", base))
        .json(&json!({ "product_id": "p1" }))
        .send()
        .await?;
    assert_eq!(buy.status(), 403);
    let body = buy.json::<Value>().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["requested"], 100);

    let denied = client
        .get(format!("{}/api/accounts/u1/products/p1/download", base))
        .send()
        .await?;
    assert_eq!(denied.status(), 403);

    let credit = client
        .post(format!("{}/api/accounts/u1/credit", base))
        .json(&json!({ "amount": "150" }))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(credit["data"]["balance"], 150);

    let bad_credit = client
        .post(format!("{}/api/accounts/u1/credit", base))
        .json(&json!({ "amount": -5 }))
        .send()
        .await?;
    assert_eq!(bad_credit.status(), 400);

    let buy = client
        .post(format!("{}/api/accounts/u1/purchases", base))
        .json(&json!({ "product_id": "p1" }))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(buy["success"], true);
    assert_eq!(buy["data"]["balance"], 50);

    let balance = client
        .get(format!("{}/api/accounts/u1/balance", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(balance["data"]["balance"], 50);

    let download = client
        .get(format!("{}/api/accounts/u1/products/p1/download", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(download["success"], true);
    assert_eq!(download["data"]["file"], "field-guide.pdf");
    assert_eq!(download["data"]["basis"], "purchased");

    let free = client
        .get(format!("{}/api/accounts/u1/products/free/download", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(free["data"]["basis"], "free");

    let missing = client
        .get(format!("{}/api/accounts/u1/products/ghost/download", base))
        .send()
        .await?;
    assert_eq!(missing.status(), 404);

    // purchase, paid download, free download
    let history = client
        .get(format!("{}/api/accounts/u1/history", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    let entries = history["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["product_id"], "p1");
    assert_eq!(entries[0]["paid_with"], "balance");
    assert_eq!(entries[0]["expired"], false);
    assert_eq!(entries[0]["days_left"], 7);

    let txs = client
        .get(format!("{}/api/accounts/u1/transactions", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    let txs = txs["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0]["reason"], "purchase");
    assert_eq!(txs[0]["delta"], -100);
    assert_eq!(txs[0]["reference"], "p1");
    assert_eq!(txs[1]["reason"], "top_up");

    for read in ["balance", "transactions", "history"] {
        let unknown = client
            .get(format!("{}/api/accounts/nobody/{}", base, read))
            .send()
            .await?;
        assert_eq!(unknown.status(), 404, "{}", read);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_favorites_and_malformed_bodies() -> Result<(), Box<dyn std::error::Error>> {
    let addr = spawn_server().await?;
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    for product in ["p1", "free"] {
        let added = client
            .post(format!("{}/api/favorites/u1", base))
            .json(&json!({ "product_id": product }))
            .send()
            .await?;
        assert_eq!(added.status(), 201);
    }
    let dup = client
        .post(format!("{}/api/favorites/u1", base))
        .json(&json!({ "product_id": "p1" }))
        .send()
        .await?;
    assert_eq!(dup.status(), 400);

    for body in [json!({}), json!({ "product_id": "" })] {
        let missing = client
            .post(format!("{}/api/favorites/u1", base))
            .json(&body)
            .send()
            .await?;
        assert_eq!(missing.status(), 400);
    }

    let list = client
        .get(format!("{}/api/favorites/u1", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(list["data"], json!(["p1", "free"]));

    let removed = client
        .delete(format!("{}/api/favorites/u1/p1", base))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(removed["data"], json!(["free"]));

    let again = client
        .delete(format!("{}/api/favorites/u1/p1", base))
        .send()
        .await?;
    assert_eq!(again.status(), 404);

    let malformed = client
        .post(format!("{}/api/accounts", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(malformed.status(), 422);
    let body = malformed.json::<Value>().await?;
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .starts_with("Invalid JSON body"));

    Ok(())
}
