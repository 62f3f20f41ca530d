//! Append-only per-user history of downloads and purchases, and the entitlement view over it.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{validate_id, HistoryEntry, NewHistoryEntry};
use crate::storage::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// A history entry annotated with its entitlement state at some instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitledEntry {
    #[serde(flatten)]
    pub entry: HistoryEntry,
    pub expired: bool,
    pub days_left: i64,
}

/// `(expired, days_left)` for something that happened at `at`, seen from `now`.
///
/// `days_left` is the remaining part of `window` rounded up to whole days, and is 0 exactly
/// when the window has elapsed.
pub fn entitlement_state(
    at: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> (bool, i64) {
    let remaining = window - (now - at);
    if remaining <= Duration::zero() {
        return (true, 0);
    }
    let whole_days = remaining.num_days();
    if remaining > Duration::days(whole_days) {
        (false, whole_days + 1)
    } else {
        (false, whole_days)
    }
}

/// Snapshot of a user's history, annotated lazily on iteration.
///
/// Iterating never touches the store and can be repeated.
#[derive(Debug, Clone)]
pub struct EntitlementListing {
    entries: Vec<HistoryEntry>,
    now: DateTime<Utc>,
    window: Duration,
}

impl EntitlementListing {
    pub fn new(entries: Vec<HistoryEntry>, now: DateTime<Utc>, window: Duration) -> Self {
        Self { entries, now, window }
    }

    pub fn iter(&self) -> impl Iterator<Item = EntitledEntry> + '_ {
        self.entries.iter().map(move |entry| {
            let (expired, days_left) = entitlement_state(entry.created_at, self.now, self.window);
            EntitledEntry {
                entry: entry.clone(),
                expired,
                days_left,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
pub struct HistoryJournal {
    store: Arc<dyn Store>,
}

impl HistoryJournal {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn append(
        &self,
        user_id: &str,
        product_id: &str,
        product_name: &str,
        at: DateTime<Utc>,
        paid_with: Option<&str>,
    ) -> LedgerResult<HistoryEntry> {
        validate_id("user_id", user_id)?;
        validate_id("product_id", product_id)?;
        self.store
            .append_history(NewHistoryEntry {
                user_id: user_id.to_string(),
                product_id: product_id.to_string(),
                product_name: product_name.to_string(),
                paid_with: paid_with.map(str::to_string),
                created_at: at,
            })
            .await
    }

    pub async fn list_with_entitlement(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> LedgerResult<EntitlementListing> {
        let entries = self.store.list_history(user_id).await?;
        Ok(EntitlementListing::new(entries, now, window))
    }

    /// Like `list_with_entitlement`, but `NotFound` for an unregistered account.
    pub async fn list_for_account(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> LedgerResult<EntitlementListing> {
        if self.store.get_account(user_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("account '{}'", user_id)));
        }
        self.list_with_entitlement(user_id, now, window).await
    }

    pub async fn last_purchase(
        &self,
        user_id: &str,
        product_id: &str,
    ) -> LedgerResult<Option<HistoryEntry>> {
        self.store.last_purchase(user_id, product_id).await
    }
}
