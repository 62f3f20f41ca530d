//! Records owned by the ledger core, plus the read-only product view it depends on.

use crate::domain::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Tag written on history entries that were paid from the account balance.
pub const PAID_WITH_BALANCE: &str = "balance";

const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub display_name: Option<String>,
    /// Minor currency units. Never negative.
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

/// A product as seen through the catalog. Price is in minor units; zero means free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub file: Option<String>,
}

impl Product {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Store-assigned sequence; breaks timestamp ties in append order.
    pub id: i64,
    pub user_id: String,
    pub product_id: String,
    pub product_name: String,
    pub paid_with: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn is_purchase(&self) -> bool {
        self.paid_with.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub user_id: String,
    pub product_id: String,
    pub product_name: String,
    pub paid_with: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewHistoryEntry {
    pub fn download(user_id: &str, product: &Product, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            paid_with: None,
            created_at: at,
        }
    }

    pub fn purchase(user_id: &str, product: &Product, at: DateTime<Utc>) -> Self {
        Self {
            paid_with: Some(PAID_WITH_BALANCE.to_string()),
            ..Self::download(user_id, product, at)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Succeeded,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Succeeded => "succeeded",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "succeeded" => Ok(IntentStatus::Succeeded),
            other => Err(anyhow::anyhow!("unknown intent status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_id: String,
    pub user_id: String,
    pub amount: i64,
    pub provider: String,
    pub status: IntentStatus,
    pub provider_ref: Option<String>,
    pub redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn pending(
        payment_id: String,
        user_id: &str,
        amount: i64,
        provider: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_id,
            user_id: user_id.to_string(),
            amount,
            provider: provider.to_string(),
            status: IntentStatus::Pending,
            provider_ref: None,
            redirect_url: None,
            created_at: at,
            updated_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxReason {
    TopUp,
    Purchase,
    Payment,
}

impl TxReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxReason::TopUp => "top_up",
            TxReason::Purchase => "purchase",
            TxReason::Payment => "payment",
        }
    }
}

impl FromStr for TxReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_up" => Ok(TxReason::TopUp),
            "purchase" => Ok(TxReason::Purchase),
            "payment" => Ok(TxReason::Payment),
            other => Err(anyhow::anyhow!("unknown transaction reason '{}'", other)),
        }
    }
}

/// One balance mutation, written in the same atomic step as the balance change itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: i64,
    pub user_id: String,
    pub delta: i64,
    pub balance_after: i64,
    pub reason: TxReason,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Validates an opaque external identifier (user id, product id).
pub fn validate_id(kind: &str, id: &str) -> LedgerResult<()> {
    if id.trim().is_empty() {
        return Err(LedgerError::InvalidInput(format!("{} must not be empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(LedgerError::InvalidInput(format!(
            "{} must be at most {} bytes",
            kind, MAX_ID_LEN
        )));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(LedgerError::InvalidInput(format!(
            "{} must not contain control characters",
            kind
        )));
    }
    Ok(())
}

pub fn validate_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Reads an amount in minor units from JSON. Accepts integers, integral floats and numeric
/// strings (e.g. `"150"`); rejects fractions, non-finite values and anything else.
pub fn parse_amount(v: &JsonValue) -> LedgerResult<i64> {
    if let Some(n) = v.as_i64() {
        return Ok(n);
    }
    if let Some(f) = v.as_f64() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return Ok(f as i64);
        }
        return Err(LedgerError::InvalidAmount(format!("not an integral amount: {}", f)));
    }
    if let Some(s) = v.as_str() {
        return s
            .trim()
            .parse::<i64>()
            .map_err(|_| LedgerError::InvalidAmount(format!("not a number: '{}'", s)));
    }
    Err(LedgerError::InvalidAmount(format!("expected a number, got {}", v)))
}
