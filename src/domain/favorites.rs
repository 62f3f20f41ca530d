//! Per-user favorite products.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::validate_id;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct Favorites {
    store: Arc<dyn Store>,
}

impl Favorites {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, user_id: &str) -> LedgerResult<Vec<String>> {
        validate_id("user_id", user_id)?;
        self.store.list_favorites(user_id).await
    }

    /// A missing or duplicate product id is `InvalidInput`.
    pub async fn add(
        &self,
        user_id: &str,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        validate_id("user_id", user_id)?;
        validate_id("product_id", product_id)?;
        if !self.store.add_favorite(user_id, product_id, now).await? {
            return Err(LedgerError::InvalidInput(format!(
                "'{}' is already a favorite",
                product_id
            )));
        }
        Ok(())
    }

    pub async fn remove(&self, user_id: &str, product_id: &str) -> LedgerResult<()> {
        validate_id("user_id", user_id)?;
        if !self.store.remove_favorite(user_id, product_id).await? {
            return Err(LedgerError::NotFound(format!(
                "'{}' is not a favorite",
                product_id
            )));
        }
        Ok(())
    }
}
