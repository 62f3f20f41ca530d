//! Durable store for accounts, history, ledger transactions, payment intents and favorites.
//!
//! Every multi-step mutation the core needs (debit + history append, intent settlement +
//! credit, entitlement check + append) is a single `Store` call, so implementations can make
//! it atomic with their own primitive: a SQL transaction for Postgres, one mutex for memory.

pub mod catalog;
pub mod memory;
pub mod postgres;

pub use catalog::{Catalog, InMemoryCatalog, PostgresCatalog};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::domain::error::LedgerResult;
use crate::domain::model::{
    Account, HistoryEntry, LedgerTransaction, NewHistoryEntry, PaymentIntent, TxReason,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A signed balance mutation with its journal metadata.
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub user_id: String,
    /// Positive for credits, negative for debits.
    pub delta: i64,
    pub reason: TxReason,
    pub reference: Option<String>,
    /// Appended together with the balance change, or not at all.
    pub history: Option<NewHistoryEntry>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountInsert {
    Created(Account),
    Existing(Account),
}

impl AccountInsert {
    pub fn into_account(self) -> Account {
        match self {
            AccountInsert::Created(a) | AccountInsert::Existing(a) => a,
        }
    }
}

/// Result of settling a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Credited { intent: PaymentIntent, balance: i64 },
    AlreadySucceeded(PaymentIntent),
    UnknownIntent,
    /// The owner account is gone; nothing was changed.
    UnknownAccount(PaymentIntent),
}

/// Decides, given the latest paid entry for a (user, product), what to append.
/// Returning an error aborts the grant with no write.
pub type GrantDecision<'a> =
    dyn Fn(Option<&HistoryEntry>) -> LedgerResult<NewHistoryEntry> + Send + Sync + 'a;

#[async_trait]
pub trait Store: Send + Sync {
    /// Creates tables and indexes. Called once at startup.
    async fn init_schema(&self) -> LedgerResult<()>;

    async fn ping(&self) -> LedgerResult<()>;

    async fn insert_account(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerResult<AccountInsert>;

    async fn get_account(&self, user_id: &str) -> LedgerResult<Option<Account>>;

    /// Applies `change` atomically: balance update, transaction row and optional history entry.
    ///
    /// Fails with `NotFound` for unknown accounts and `InsufficientFunds` if the balance would
    /// go negative. Returns the new balance.
    async fn apply_balance_change(&self, change: BalanceChange) -> LedgerResult<i64>;

    /// Newest first.
    async fn list_transactions(&self, user_id: &str) -> LedgerResult<Vec<LedgerTransaction>>;

    async fn append_history(&self, entry: NewHistoryEntry) -> LedgerResult<HistoryEntry>;

    /// Oldest first (timestamp, then append order).
    async fn list_history(&self, user_id: &str) -> LedgerResult<Vec<HistoryEntry>>;

    /// Latest paid entry for the product; ties on timestamp go to the later append.
    async fn last_purchase(
        &self,
        user_id: &str,
        product_id: &str,
    ) -> LedgerResult<Option<HistoryEntry>>;

    /// Reads the last purchase and appends whatever `decide` returns, serialized per user
    /// with purchases and other grants.
    async fn grant_download(
        &self,
        user_id: &str,
        product_id: &str,
        decide: &GrantDecision<'_>,
    ) -> LedgerResult<HistoryEntry>;

    async fn insert_intent(&self, intent: &PaymentIntent) -> LedgerResult<()>;

    async fn attach_provider_ref(
        &self,
        payment_id: &str,
        provider_ref: &str,
        redirect_url: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<PaymentIntent>;

    /// Looks up by payment id first, then by provider reference.
    async fn find_intent(&self, id: &str) -> LedgerResult<Option<PaymentIntent>>;

    /// Flips a pending intent to succeeded and credits `amount` to its owner in one step.
    async fn settle_intent(
        &self,
        id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> LedgerResult<SettleOutcome>;

    /// Insertion order.
    async fn list_favorites(&self, user_id: &str) -> LedgerResult<Vec<String>>;

    /// Returns false if the product was already a favorite.
    async fn add_favorite(
        &self,
        user_id: &str,
        product_id: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<bool>;

    /// Returns false if the product was not a favorite.
    async fn remove_favorite(&self, user_id: &str, product_id: &str) -> LedgerResult<bool>;
}
