//! The ledger: the only component allowed to change account balances.
//!
//! Validation happens here; atomicity and per-account serialization are delegated to the
//! store's `apply_balance_change`.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{validate_amount, LedgerTransaction, NewHistoryEntry, TxReason};
use crate::storage::{BalanceChange, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Tops up a balance. Returns the new balance.
    pub async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        validate_amount(amount)?;
        let balance = self
            .store
            .apply_balance_change(BalanceChange {
                user_id: user_id.to_string(),
                delta: amount,
                reason: TxReason::TopUp,
                reference: None,
                history: None,
                at: now,
            })
            .await?;
        info!(user_id, amount, balance, "balance credited");
        Ok(balance)
    }

    /// Returns the new balance, or `InsufficientFunds` if `amount` exceeds it.
    pub async fn debit(&self, user_id: &str, amount: i64, now: DateTime<Utc>) -> LedgerResult<i64> {
        self.debit_with_entry(user_id, amount, TxReason::Purchase, None, None, now)
            .await
    }

    /// Debits and appends `entry` as one unit: either both are stored or neither is.
    pub async fn debit_with_entry(
        &self,
        user_id: &str,
        amount: i64,
        reason: TxReason,
        reference: Option<String>,
        entry: Option<NewHistoryEntry>,
        now: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        validate_amount(amount)?;
        let result = self
            .store
            .apply_balance_change(BalanceChange {
                user_id: user_id.to_string(),
                delta: -amount,
                reason,
                reference,
                history: entry,
                at: now,
            })
            .await;
        match &result {
            Ok(balance) => info!(user_id, amount, balance, "balance debited"),
            Err(LedgerError::InsufficientFunds { balance, .. }) => {
                debug!(user_id, amount, balance, "debit rejected: insufficient funds")
            }
            Err(_) => {}
        }
        result
    }

    pub async fn balance(&self, user_id: &str) -> LedgerResult<i64> {
        self.store
            .get_account(user_id)
            .await?
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::NotFound(format!("account '{}'", user_id)))
    }

    /// Balance mutations, newest first.
    pub async fn transactions(&self, user_id: &str) -> LedgerResult<Vec<LedgerTransaction>> {
        if self.store.get_account(user_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("account '{}'", user_id)));
        }
        self.store.list_transactions(user_id).await
    }
}
