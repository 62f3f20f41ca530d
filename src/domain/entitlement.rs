//! Download-rights evaluation.
//!
//! A request moves through: product lookup -> free grant | purchase lookup -> window check.
//! Every grant appends a history entry; the purchase lookup and the append run inside one
//! store call so a concurrent purchase by the same user cannot slip between them.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{validate_id, HistoryEntry, NewHistoryEntry, Product};
use crate::storage::{Catalog, Store};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// How long a purchase keeps its file downloadable.
pub fn default_validity_window() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum GrantBasis {
    Free,
    Purchased {
        purchased_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessGrant {
    pub product_id: String,
    pub file: String,
    #[serde(flatten)]
    pub basis: GrantBasis,
    pub entry: HistoryEntry,
}

#[derive(Clone)]
pub struct EntitlementEvaluator {
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    window: Duration,
}

impl EntitlementEvaluator {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<dyn Catalog>, window: Duration) -> Self {
        Self {
            store,
            catalog,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    async fn downloadable_product(&self, product_id: &str) -> LedgerResult<(Product, String)> {
        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("product '{}'", product_id)))?;
        match product.file.clone() {
            Some(file) if !file.is_empty() => Ok((product, file)),
            _ => Err(LedgerError::NotFound(format!(
                "product '{}' has no downloadable file",
                product_id
            ))),
        }
    }

    /// Grants a download of `product_id` to `user_id` and records it, or explains why not.
    pub async fn check_access(
        &self,
        user_id: &str,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<AccessGrant> {
        validate_id("user_id", user_id)?;
        let (product, file) = self.downloadable_product(product_id).await?;

        if product.is_free() {
            let entry = self
                .store
                .append_history(NewHistoryEntry::download(user_id, &product, now))
                .await?;
            debug!(user_id, product_id, "free download granted");
            return Ok(AccessGrant {
                product_id: product.id,
                file,
                basis: GrantBasis::Free,
                entry,
            });
        }

        let window = self.window;
        let purchased_at = OnceLock::new();
        let decide = |last: Option<&HistoryEntry>| -> LedgerResult<NewHistoryEntry> {
            let purchase = last.ok_or_else(|| LedgerError::Forbidden("not purchased".to_string()))?;
            if now - purchase.created_at >= window {
                return Err(LedgerError::Forbidden("expired".to_string()));
            }
            let _ = purchased_at.set(purchase.created_at);
            Ok(NewHistoryEntry::download(user_id, &product, now))
        };
        let entry = self.store.grant_download(user_id, product_id, &decide).await?;
        let purchased_at = purchased_at.get().copied().unwrap_or(now);

        info!(user_id, product_id, "paid download granted");
        Ok(AccessGrant {
            product_id: product.id.clone(),
            file,
            basis: GrantBasis::Purchased {
                purchased_at,
                expires_at: purchased_at + window,
            },
            entry,
        })
    }
}
