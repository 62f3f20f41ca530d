//! Outbound payment-provider calls.
//!
//! Only the intent-creation contract lives here: send amount, user and idempotency key,
//! receive the provider's reference and a redirect URL for the customer.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct RemoteIntentRequest<'a> {
    pub provider: &'a str,
    pub amount: i64,
    pub user_id: &'a str,
    pub idempotency_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIntent {
    pub provider_ref: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn supports(&self, provider: &str) -> bool;

    async fn create_remote_intent(
        &self,
        request: &RemoteIntentRequest<'_>,
    ) -> anyhow::Result<RemoteIntent>;
}

/// Posts intent requests as JSON to a per-provider endpoint.
///
/// The payment id travels both in the body and in the `Idempotency-Key` header.
#[derive(Clone)]
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

#[derive(Serialize)]
struct IntentBody<'a> {
    amount: i64,
    user_id: &'a str,
    payment_id: &'a str,
}

impl HttpPaymentProvider {
    pub fn new(client: reqwest::Client, endpoints: HashMap<String, String>) -> Self {
        Self { client, endpoints }
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    fn supports(&self, provider: &str) -> bool {
        self.endpoints.contains_key(provider)
    }

    async fn create_remote_intent(
        &self,
        request: &RemoteIntentRequest<'_>,
    ) -> anyhow::Result<RemoteIntent> {
        let url = self
            .endpoints
            .get(request.provider)
            .ok_or_else(|| anyhow::anyhow!("unknown payment provider '{}'", request.provider))?;

        let response = self
            .client
            .post(url)
            .header("Idempotency-Key", request.idempotency_key)
            .json(&IntentBody {
                amount: request.amount,
                user_id: request.user_id,
                payment_id: request.idempotency_key,
            })
            .send()
            .await
            .with_context(|| format!("request to provider '{}' failed", request.provider))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "provider '{}' returned {}: {}",
                request.provider,
                status,
                body
            ));
        }

        let intent = response
            .json::<RemoteIntent>()
            .await
            .with_context(|| format!("provider '{}' sent an unreadable intent", request.provider))?;
        Ok(intent)
    }
}
