//! Error taxonomy shared by the ledger, entitlement and payment components.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payment provider error: {0}")]
    Upstream(String),
    /// Webhook referenced something we cannot apply. Logged and acknowledged, never surfaced
    /// to the provider as a failure.
    #[error("anomaly acknowledged: {0}")]
    AnomalyAcknowledged(String),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// True for rejections caused by the caller's request rather than by the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound(_)
                | LedgerError::InvalidAmount(_)
                | LedgerError::InvalidInput(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::Forbidden(_)
                | LedgerError::Conflict(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(anyhow::Error::new(err))
    }
}
