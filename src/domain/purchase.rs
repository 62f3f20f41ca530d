//! Balance-funded purchases.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::ledger::Ledger;
use crate::domain::model::{validate_id, NewHistoryEntry, TxReason};
use crate::storage::Catalog;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    pub user_id: String,
    pub product_id: String,
    pub price: i64,
    pub balance: i64,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PurchaseFlow {
    ledger: Ledger,
    catalog: Arc<dyn Catalog>,
}

impl PurchaseFlow {
    pub fn new(ledger: Ledger, catalog: Arc<dyn Catalog>) -> Self {
        Self { ledger, catalog }
    }

    /// Debits the product price and records the purchase in history, atomically.
    ///
    /// Free products are not purchasable here; they go through the download grant instead.
    pub async fn buy(
        &self,
        user_id: &str,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<PurchaseReceipt> {
        validate_id("user_id", user_id)?;
        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("product '{}'", product_id)))?;
        if product.price <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "product '{}' has no positive price",
                product_id
            )));
        }

        let balance = self
            .ledger
            .debit_with_entry(
                user_id,
                product.price,
                TxReason::Purchase,
                Some(product.id.clone()),
                Some(NewHistoryEntry::purchase(user_id, &product, now)),
                now,
            )
            .await?;
        info!(user_id, product_id, price = product.price, balance, "purchase completed");

        Ok(PurchaseReceipt {
            user_id: user_id.to_string(),
            product_id: product.id,
            price: product.price,
            balance,
            purchased_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Product, PAID_WITH_BALANCE};
    use crate::storage::{InMemoryCatalog, MemoryStore, Store};

    async fn setup() -> (PurchaseFlow, Ledger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_account("u1", None, Utc::now()).await.unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_products([
            Product {
                id: "p1".into(),
                name: "Guide".into(),
                price: 100,
                file: Some("guide.pdf".into()),
            },
            Product {
                id: "free".into(),
                name: "Sampler".into(),
                price: 0,
                file: Some("sampler.zip".into()),
            },
        ]));
        let ledger = Ledger::new(store.clone());
        (PurchaseFlow::new(ledger.clone(), catalog), ledger, store)
    }

    #[tokio::test]
    async fn buy_scenario_insufficient_then_topped_up() {
        let (flow, ledger, store) = setup().await;
        let now = Utc::now();

        let err = flow.buy("u1", "p1", now).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { balance: 0, requested: 100 }));
        assert!(store.list_history("u1").await.unwrap().is_empty());

        assert_eq!(ledger.credit("u1", 150, now).await.unwrap(), 150);
        let receipt = flow.buy("u1", "p1", now).await.unwrap();
        assert_eq!(receipt.balance, 50);

        let history = store.list_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].paid_with.as_deref(), Some(PAID_WITH_BALANCE));
        assert_eq!(history[0].product_name, "Guide");
    }

    #[tokio::test]
    async fn free_and_unknown_products_are_not_purchasable() {
        let (flow, ledger, _) = setup().await;
        let now = Utc::now();
        ledger.credit("u1", 500, now).await.unwrap();
        assert!(matches!(
            flow.buy("u1", "free", now).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            flow.buy("u1", "ghost", now).await,
            Err(LedgerError::NotFound(_))
        ));
        assert_eq!(ledger.balance("u1").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn unknown_account_cannot_buy() {
        let (flow, _, store) = setup().await;
        assert!(matches!(
            flow.buy("u2", "p1", Utc::now()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(store.list_history("u2").await.unwrap().is_empty());
    }
}
