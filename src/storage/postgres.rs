//! Persistent store implementation using PostgreSQL.
//!
//! Per-user serialization uses a transaction-scoped advisory lock keyed by the user id, so
//! purchases, grants and settlements for one user are ordered across every instance sharing
//! the database. Balance rows are additionally locked with `FOR UPDATE`.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{
    Account, HistoryEntry, IntentStatus, LedgerTransaction, NewHistoryEntry, PaymentIntent,
    TxReason,
};
use crate::storage::{AccountInsert, BalanceChange, GrantDecision, SettleOutcome, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};

/// First key of the two-key advisory lock; the second is `hashtext(user_id)`.
const USER_LOCK_SPACE: i32 = 4_240_101;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        user_id TEXT PRIMARY KEY,
        display_name TEXT,
        balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS history (
        id BIGSERIAL PRIMARY KEY,
        user_id TEXT NOT NULL,
        product_id TEXT NOT NULL,
        product_name TEXT NOT NULL,
        paid_with TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_history_user
        ON history (user_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_history_purchases
        ON history (user_id, product_id, created_at DESC, id DESC)
        WHERE paid_with IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS ledger_transactions (
        id BIGSERIAL PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES accounts (user_id),
        delta BIGINT NOT NULL,
        balance_after BIGINT NOT NULL CHECK (balance_after >= 0),
        reason TEXT NOT NULL,
        reference TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_ledger_transactions_user
        ON ledger_transactions (user_id, id DESC)",
    "CREATE TABLE IF NOT EXISTS payment_intents (
        payment_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        provider TEXT NOT NULL,
        status TEXT NOT NULL,
        provider_ref TEXT UNIQUE,
        redirect_url TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS favorites (
        user_id TEXT NOT NULL,
        product_id TEXT NOT NULL,
        seq BIGSERIAL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (user_id, product_id)
    )",
    // Owned by the catalog; created here so a fresh database is usable.
    "CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        price BIGINT NOT NULL,
        file TEXT
    )",
];

const INTENT_COLUMNS: &str = "payment_id, user_id, amount, provider, status, provider_ref, \
                              redirect_url, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_user(conn: &mut PgConnection, user_id: &str) -> LedgerResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(USER_LOCK_SPACE)
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn change_balance_in_tx(
        conn: &mut PgConnection,
        user_id: &str,
        delta: i64,
        reason: TxReason,
        reference: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;
        let balance =
            balance.ok_or_else(|| LedgerError::NotFound(format!("account '{}'", user_id)))?;
        let new_balance = balance
            .checked_add(delta)
            .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".to_string()))?;
        if new_balance < 0 {
            return Err(LedgerError::InsufficientFunds {
                balance,
                requested: -delta,
            });
        }

        sqlx::query("UPDATE accounts SET balance = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(new_balance)
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            "INSERT INTO ledger_transactions
                (user_id, delta, balance_after, reason, reference, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user_id)
        .bind(delta)
        .bind(new_balance)
        .bind(reason.as_str())
        .bind(reference)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        Ok(new_balance)
    }

    async fn insert_history_in_tx(
        conn: &mut PgConnection,
        entry: &NewHistoryEntry,
    ) -> LedgerResult<HistoryEntry> {
        let row = sqlx::query(
            "INSERT INTO history (user_id, product_id, product_name, paid_with, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, user_id, product_id, product_name, paid_with, created_at",
        )
        .bind(&entry.user_id)
        .bind(&entry.product_id)
        .bind(&entry.product_name)
        .bind(entry.paid_with.as_deref())
        .bind(entry.created_at)
        .fetch_one(conn)
        .await?;
        history_from_row(&row)
    }

    async fn last_purchase_in(
        conn: &mut PgConnection,
        user_id: &str,
        product_id: &str,
    ) -> LedgerResult<Option<HistoryEntry>> {
        let row = sqlx::query(
            "SELECT id, user_id, product_id, product_name, paid_with, created_at
             FROM history
             WHERE user_id = $1 AND product_id = $2 AND paid_with IS NOT NULL
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(conn)
        .await?;
        row.as_ref().map(history_from_row).transpose()
    }
}

fn account_from_row(row: &PgRow) -> LedgerResult<Account> {
    Ok(Account {
        user_id: row.try_get("user_id")?,
        display_name: row.try_get("display_name")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
    })
}

fn history_from_row(row: &PgRow) -> LedgerResult<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        paid_with: row.try_get("paid_with")?,
        created_at: row.try_get("created_at")?,
    })
}

fn intent_from_row(row: &PgRow) -> LedgerResult<PaymentIntent> {
    let status: String = row.try_get("status")?;
    Ok(PaymentIntent {
        payment_id: row.try_get("payment_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        provider: row.try_get("provider")?,
        status: status.parse::<IntentStatus>()?,
        provider_ref: row.try_get("provider_ref")?,
        redirect_url: row.try_get("redirect_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> LedgerResult<LedgerTransaction> {
    let reason: String = row.try_get("reason")?;
    Ok(LedgerTransaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        delta: row.try_get("delta")?,
        balance_after: row.try_get("balance_after")?,
        reason: reason.parse::<TxReason>()?,
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn init_schema(&self) -> LedgerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_account(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerResult<AccountInsert> {
        let inserted = sqlx::query(
            "INSERT INTO accounts (user_id, display_name, balance, created_at)
             VALUES ($1, $2, 0, $3)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING user_id, display_name, balance, created_at",
        )
        .bind(user_id)
        .bind(display_name)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok(AccountInsert::Created(account_from_row(&row)?));
        }

        let existing = self.get_account(user_id).await?.ok_or_else(|| {
            LedgerError::Storage(anyhow::anyhow!(
                "account '{}' conflicted on insert but is not readable",
                user_id
            ))
        })?;
        Ok(AccountInsert::Existing(existing))
    }

    async fn get_account(&self, user_id: &str) -> LedgerResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT user_id, display_name, balance, created_at FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn apply_balance_change(&self, change: BalanceChange) -> LedgerResult<i64> {
        let mut tx = self.pool.begin().await?;
        Self::lock_user(&mut tx, &change.user_id).await?;

        // Any error drops `tx` uncommitted, which rolls back every step.
        let balance = Self::change_balance_in_tx(
            &mut tx,
            &change.user_id,
            change.delta,
            change.reason,
            change.reference.as_deref(),
            change.at,
        )
        .await?;
        if let Some(entry) = &change.history {
            Self::insert_history_in_tx(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(balance)
    }

    async fn list_transactions(&self, user_id: &str) -> LedgerResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query(
            "SELECT id, user_id, delta, balance_after, reason, reference, created_at
             FROM ledger_transactions WHERE user_id = $1 ORDER BY id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> LedgerResult<HistoryEntry> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_history_in_tx(&mut conn, &entry).await
    }

    async fn list_history(&self, user_id: &str) -> LedgerResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, product_id, product_name, paid_with, created_at
             FROM history WHERE user_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn last_purchase(
        &self,
        user_id: &str,
        product_id: &str,
    ) -> LedgerResult<Option<HistoryEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::last_purchase_in(&mut conn, user_id, product_id).await
    }

    async fn grant_download(
        &self,
        user_id: &str,
        product_id: &str,
        decide: &GrantDecision<'_>,
    ) -> LedgerResult<HistoryEntry> {
        let mut tx = self.pool.begin().await?;
        Self::lock_user(&mut tx, user_id).await?;

        let last = Self::last_purchase_in(&mut tx, user_id, product_id).await?;
        let entry = decide(last.as_ref())?;
        let stored = Self::insert_history_in_tx(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn insert_intent(&self, intent: &PaymentIntent) -> LedgerResult<()> {
        let result = sqlx::query(
            "INSERT INTO payment_intents
                (payment_id, user_id, amount, provider, status, provider_ref, redirect_url,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (payment_id) DO NOTHING",
        )
        .bind(&intent.payment_id)
        .bind(&intent.user_id)
        .bind(intent.amount)
        .bind(&intent.provider)
        .bind(intent.status.as_str())
        .bind(intent.provider_ref.as_deref())
        .bind(intent.redirect_url.as_deref())
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::Conflict(format!(
                "payment id '{}' already exists",
                intent.payment_id
            )));
        }
        Ok(())
    }

    async fn attach_provider_ref(
        &self,
        payment_id: &str,
        provider_ref: &str,
        redirect_url: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<PaymentIntent> {
        let sql = format!(
            "UPDATE payment_intents
             SET provider_ref = $2, redirect_url = $3, updated_at = $4
             WHERE payment_id = $1
             RETURNING {}",
            INTENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .bind(provider_ref)
            .bind(redirect_url)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return LedgerError::Conflict(format!(
                            "provider reference '{}' already belongs to another intent",
                            provider_ref
                        ));
                    }
                }
                LedgerError::from(e)
            })?;
        match row {
            Some(row) => intent_from_row(&row),
            None => Err(LedgerError::NotFound(format!("payment intent '{}'", payment_id))),
        }
    }

    async fn find_intent(&self, id: &str) -> LedgerResult<Option<PaymentIntent>> {
        let sql = format!(
            "SELECT {} FROM payment_intents
             WHERE payment_id = $1 OR provider_ref = $1
             ORDER BY (payment_id = $1) DESC
             LIMIT 1",
            INTENT_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn settle_intent(
        &self,
        id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> LedgerResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM payment_intents
             WHERE payment_id = $1 OR provider_ref = $1
             ORDER BY (payment_id = $1) DESC
             LIMIT 1
             FOR UPDATE",
            INTENT_COLUMNS
        );
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await? else {
            return Ok(SettleOutcome::UnknownIntent);
        };
        let intent = intent_from_row(&row)?;
        if intent.status == IntentStatus::Succeeded {
            return Ok(SettleOutcome::AlreadySucceeded(intent));
        }

        Self::lock_user(&mut tx, &intent.user_id).await?;
        let balance = match Self::change_balance_in_tx(
            &mut tx,
            &intent.user_id,
            amount,
            TxReason::Payment,
            Some(&intent.payment_id),
            at,
        )
        .await
        {
            Ok(balance) => balance,
            Err(LedgerError::NotFound(_)) => return Ok(SettleOutcome::UnknownAccount(intent)),
            Err(e) => return Err(e),
        };

        let flipped = sqlx::query(
            "UPDATE payment_intents SET status = $2, updated_at = $3
             WHERE payment_id = $1 AND status = $4",
        )
        .bind(&intent.payment_id)
        .bind(IntentStatus::Succeeded.as_str())
        .bind(at)
        .bind(IntentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() != 1 {
            // Row lock makes this unreachable; dropping `tx` discards the credit.
            return Ok(SettleOutcome::AlreadySucceeded(intent));
        }

        tx.commit().await?;
        Ok(SettleOutcome::Credited {
            intent: PaymentIntent {
                status: IntentStatus::Succeeded,
                updated_at: at,
                ..intent
            },
            balance,
        })
    }

    async fn list_favorites(&self, user_id: &str) -> LedgerResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT product_id FROM favorites WHERE user_id = $1 ORDER BY seq")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn add_favorite(
        &self,
        user_id: &str,
        product_id: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            "INSERT INTO favorites (user_id, product_id, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (user_id, product_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_favorite(&self, user_id: &str, product_id: &str) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
