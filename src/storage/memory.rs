//! In-process `Store` backed by a single mutex. Used by tests and local development; it gives
//! the same atomicity as the Postgres store within one process.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{
    Account, HistoryEntry, IntentStatus, LedgerTransaction, NewHistoryEntry, PaymentIntent,
    TxReason,
};
use crate::storage::{AccountInsert, BalanceChange, GrantDecision, SettleOutcome, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    history: HashMap<String, Vec<HistoryEntry>>,
    transactions: HashMap<String, Vec<LedgerTransaction>>,
    intents: HashMap<String, PaymentIntent>,
    /// provider_ref -> payment_id
    provider_refs: HashMap<String, String>,
    favorites: HashMap<String, Vec<String>>,
    favorite_index: HashSet<(String, String)>,
    next_seq: i64,
}

impl MemoryState {
    fn next_seq(&mut self) -> i64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn push_history(&mut self, entry: NewHistoryEntry) -> HistoryEntry {
        let stored = HistoryEntry {
            id: self.next_seq(),
            user_id: entry.user_id,
            product_id: entry.product_id,
            product_name: entry.product_name,
            paid_with: entry.paid_with,
            created_at: entry.created_at,
        };
        self.history
            .entry(stored.user_id.clone())
            .or_default()
            .push(stored.clone());
        stored
    }

    fn last_purchase(&self, user_id: &str, product_id: &str) -> Option<HistoryEntry> {
        self.history
            .get(user_id)?
            .iter()
            .filter(|e| e.product_id == product_id && e.is_purchase())
            .max_by_key(|e| (e.created_at, e.id))
            .cloned()
    }

    /// Validates and applies a balance delta. Leaves state untouched on error.
    fn change_balance(
        &mut self,
        user_id: &str,
        delta: i64,
        reason: TxReason,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let balance = self
            .accounts
            .get(user_id)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::NotFound(format!("account '{}'", user_id)))?;
        let new_balance = balance
            .checked_add(delta)
            .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".to_string()))?;
        if new_balance < 0 {
            return Err(LedgerError::InsufficientFunds {
                balance,
                requested: -delta,
            });
        }

        let id = self.next_seq();
        if let Some(account) = self.accounts.get_mut(user_id) {
            account.balance = new_balance;
        }
        self.transactions
            .entry(user_id.to_string())
            .or_default()
            .push(LedgerTransaction {
                id,
                user_id: user_id.to_string(),
                delta,
                balance_after: new_balance,
                reason,
                reference,
                created_at: at,
            });
        Ok(new_balance)
    }

    fn resolve_intent_id(&self, id: &str) -> Option<String> {
        if self.intents.contains_key(id) {
            return Some(id.to_string());
        }
        self.provider_refs.get(id).cloned()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init_schema(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn insert_account(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerResult<AccountInsert> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.accounts.get(user_id) {
            return Ok(AccountInsert::Existing(existing.clone()));
        }
        let account = Account {
            user_id: user_id.to_string(),
            display_name: display_name.map(str::to_string),
            balance: 0,
            created_at: at,
        };
        state.accounts.insert(user_id.to_string(), account.clone());
        Ok(AccountInsert::Created(account))
    }

    async fn get_account(&self, user_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(user_id).cloned())
    }

    async fn apply_balance_change(&self, change: BalanceChange) -> LedgerResult<i64> {
        let mut state = self.state.lock().await;
        let balance = state.change_balance(
            &change.user_id,
            change.delta,
            change.reason,
            change.reference,
            change.at,
        )?;
        if let Some(entry) = change.history {
            state.push_history(entry);
        }
        Ok(balance)
    }

    async fn list_transactions(&self, user_id: &str) -> LedgerResult<Vec<LedgerTransaction>> {
        let state = self.state.lock().await;
        let mut txs = state.transactions.get(user_id).cloned().unwrap_or_default();
        txs.reverse();
        Ok(txs)
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> LedgerResult<HistoryEntry> {
        Ok(self.state.lock().await.push_history(entry))
    }

    async fn list_history(&self, user_id: &str) -> LedgerResult<Vec<HistoryEntry>> {
        let state = self.state.lock().await;
        let mut entries = state.history.get(user_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn last_purchase(
        &self,
        user_id: &str,
        product_id: &str,
    ) -> LedgerResult<Option<HistoryEntry>> {
        Ok(self.state.lock().await.last_purchase(user_id, product_id))
    }

    async fn grant_download(
        &self,
        user_id: &str,
        product_id: &str,
        decide: &GrantDecision<'_>,
    ) -> LedgerResult<HistoryEntry> {
        let mut state = self.state.lock().await;
        let last = state.last_purchase(user_id, product_id);
        let entry = decide(last.as_ref())?;
        Ok(state.push_history(entry))
    }

    async fn insert_intent(&self, intent: &PaymentIntent) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        if state.intents.contains_key(&intent.payment_id) {
            return Err(LedgerError::Conflict(format!(
                "payment id '{}' already exists",
                intent.payment_id
            )));
        }
        state.intents.insert(intent.payment_id.clone(), intent.clone());
        Ok(())
    }

    async fn attach_provider_ref(
        &self,
        payment_id: &str,
        provider_ref: &str,
        redirect_url: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<PaymentIntent> {
        let mut state = self.state.lock().await;
        if let Some(owner) = state.provider_refs.get(provider_ref) {
            if owner != payment_id {
                return Err(LedgerError::Conflict(format!(
                    "provider reference '{}' already belongs to another intent",
                    provider_ref
                )));
            }
        }
        let intent = state
            .intents
            .get_mut(payment_id)
            .ok_or_else(|| LedgerError::NotFound(format!("payment intent '{}'", payment_id)))?;
        intent.provider_ref = Some(provider_ref.to_string());
        intent.redirect_url = Some(redirect_url.to_string());
        intent.updated_at = at;
        let updated = intent.clone();
        state
            .provider_refs
            .insert(provider_ref.to_string(), payment_id.to_string());
        Ok(updated)
    }

    async fn find_intent(&self, id: &str) -> LedgerResult<Option<PaymentIntent>> {
        let state = self.state.lock().await;
        Ok(state
            .resolve_intent_id(id)
            .and_then(|pid| state.intents.get(&pid).cloned()))
    }

    async fn settle_intent(
        &self,
        id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> LedgerResult<SettleOutcome> {
        let mut state = self.state.lock().await;
        let Some(payment_id) = state.resolve_intent_id(id) else {
            return Ok(SettleOutcome::UnknownIntent);
        };
        let Some(intent) = state.intents.get(&payment_id).cloned() else {
            return Ok(SettleOutcome::UnknownIntent);
        };
        if intent.status == IntentStatus::Succeeded {
            return Ok(SettleOutcome::AlreadySucceeded(intent));
        }
        if !state.accounts.contains_key(&intent.user_id) {
            return Ok(SettleOutcome::UnknownAccount(intent));
        }

        let balance = state.change_balance(
            &intent.user_id,
            amount,
            TxReason::Payment,
            Some(payment_id.clone()),
            at,
        )?;
        let settled = PaymentIntent {
            status: IntentStatus::Succeeded,
            updated_at: at,
            ..intent
        };
        state.intents.insert(payment_id, settled.clone());
        Ok(SettleOutcome::Credited {
            intent: settled,
            balance,
        })
    }

    async fn list_favorites(&self, user_id: &str) -> LedgerResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .favorites
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_favorite(
        &self,
        user_id: &str,
        product_id: &str,
        _at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), product_id.to_string());
        if !state.favorite_index.insert(key) {
            return Ok(false);
        }
        state
            .favorites
            .entry(user_id.to_string())
            .or_default()
            .push(product_id.to_string());
        Ok(true)
    }

    async fn remove_favorite(&self, user_id: &str, product_id: &str) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), product_id.to_string());
        if !state.favorite_index.remove(&key) {
            return Ok(false);
        }
        if let Some(list) = state.favorites.get_mut(user_id) {
            list.retain(|p| p != product_id);
        }
        Ok(true)
    }
}
