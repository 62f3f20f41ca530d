//! Account registration and lookup.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{validate_id, Account};
use crate::storage::{AccountInsert, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn Store>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Idempotent: an existing account is returned unchanged.
    pub async fn ensure_account(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Account> {
        validate_id("user_id", user_id)?;
        let inserted = self.store.insert_account(user_id, display_name, now).await?;
        if let AccountInsert::Created(account) = &inserted {
            info!(user_id = %account.user_id, "account created");
        }
        Ok(inserted.into_account())
    }

    /// Like `ensure_account`, but a second registration of the same id is a `Conflict`.
    pub async fn register_account(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Account> {
        validate_id("user_id", user_id)?;
        match self.store.insert_account(user_id, display_name, now).await? {
            AccountInsert::Created(account) => {
                info!(user_id = %account.user_id, "account registered");
                Ok(account)
            }
            AccountInsert::Existing(_) => Err(LedgerError::Conflict(format!(
                "account '{}' already exists",
                user_id
            ))),
        }
    }

    pub async fn get_account(&self, user_id: &str) -> LedgerResult<Account> {
        self.store
            .get_account(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account '{}'", user_id)))
    }
}
