//! The storefront service.
//!
//! Wires the core components over one shared `Store` and `Catalog`, so that direct purchases,
//! download grants and payment webhooks all serialize on the same per-account primitives.

use crate::domain::accounts::AccountRegistry;
use crate::domain::entitlement::{default_validity_window, EntitlementEvaluator};
use crate::domain::favorites::Favorites;
use crate::domain::history::HistoryJournal;
use crate::domain::ledger::Ledger;
use crate::domain::payment::PaymentReconciler;
use crate::domain::purchase::PurchaseFlow;
use crate::infra::config::Config;
use crate::infra::provider::{HttpPaymentProvider, PaymentProvider};
use crate::storage::{Catalog, MemoryStore, PostgresCatalog, PostgresStore, Store};
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

pub struct StorefrontService {
    pub accounts: AccountRegistry,
    pub ledger: Ledger,
    pub journal: HistoryJournal,
    pub entitlements: EntitlementEvaluator,
    pub purchases: PurchaseFlow,
    pub payments: PaymentReconciler,
    pub favorites: Favorites,
    store: Arc<dyn Store>,
}

impl StorefrontService {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn Catalog>,
        provider: Arc<dyn PaymentProvider>,
        window: Duration,
        provider_timeout: std::time::Duration,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        Self {
            accounts: AccountRegistry::new(store.clone()),
            journal: HistoryJournal::new(store.clone()),
            entitlements: EntitlementEvaluator::new(store.clone(), catalog.clone(), window),
            purchases: PurchaseFlow::new(ledger.clone(), catalog),
            payments: PaymentReconciler::new(store.clone(), provider, provider_timeout),
            favorites: Favorites::new(store.clone()),
            ledger,
            store,
        }
    }

    /// In-process service over `MemoryStore`; nothing survives the process.
    pub fn in_memory(catalog: Arc<dyn Catalog>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            catalog,
            provider,
            default_validity_window(),
            std::time::Duration::from_secs(crate::infra::config::DEFAULT_PROVIDER_TIMEOUT_SECS),
        )
    }

    /// Connects to Postgres, creates missing tables and builds the HTTP provider client.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let store = PostgresStore::connect(&config.database_url, config.max_connections).await?;
        store
            .init_schema()
            .await
            .context("failed to initialise database schema")?;
        let catalog = PostgresCatalog::new(store.pool().clone());

        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()
            .context("failed to build HTTP client")?;
        let provider = HttpPaymentProvider::new(client, config.payment_providers.clone());
        info!(providers = ?provider.providers(), "payment providers configured");

        Ok(Self::new(
            Arc::new(store),
            Arc::new(catalog),
            Arc::new(provider),
            default_validity_window(),
            config.provider_timeout,
        ))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.store.ping().await.map_err(anyhow::Error::from)
    }
}
