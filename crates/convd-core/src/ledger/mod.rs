//! Per-user daily credit ledger.
//!
//! Each account holds a balance between 0 and the daily cap. The balance is
//! refilled lazily: the first access after the stored UTC-midnight boundary resets
//! it to the cap and moves the boundary forward. Consume and reset share a single
//! read-modify-write transaction, so concurrent calls for one user serialize.
//! Accounts with an unlimited entitlement never touch their balance.

mod entitlement;
mod reset;

use sqlx::{Pool, Sqlite};
use std::time::Duration;
use thiserror::Error;

use crate::config::CreditsConfig;
use crate::task_db::{OwnerId, TaskDb};

/// Outcome of a successful consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumed {
    /// Balance after the debit; 0 for unlimited accounts.
    pub remaining: i64,
    pub unlimited: bool,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Not enough credits; the balance was left untouched.
    #[error("insufficient credits ({remaining} remaining)")]
    InsufficientCredits { remaining: i64 },
    #[error("credit transaction timed out after {0:?}")]
    Timeout(Duration),
    #[error("credit store: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct CreditLedger {
    pool: Pool<Sqlite>,
    daily_cap: i64,
    tx_timeout: Duration,
}

impl CreditLedger {
    pub fn new(db: &TaskDb, cfg: &CreditsConfig) -> Self {
        Self {
            pool: db.pool.clone(),
            daily_cap: cfg.daily_cap.max(0),
            tx_timeout: Duration::from_secs(cfg.tx_timeout_secs.max(1)),
        }
    }

    pub fn daily_cap(&self) -> i64 {
        self.daily_cap
    }

    /// Debit `amount` credits from `user`.
    ///
    /// Unlimited accounts get `Consumed { remaining: 0, unlimited: true }` without a
    /// debit. Negative amounts count as 0. When `amount` exceeds the balance the
    /// result is [`LedgerError::InsufficientCredits`] carrying the current balance.
    pub async fn consume(&self, user: OwnerId, amount: i64) -> Result<Consumed, LedgerError> {
        self.consume_at(user, amount, crate::task_db::db::unix_timestamp())
            .await
    }

    /// Current balance, applying a pending daily reset. Same path as `consume(user, 0)`.
    pub async fn get_or_reset_balance(&self, user: OwnerId) -> Result<Consumed, LedgerError> {
        self.consume(user, 0).await
    }

    /// Give back `amount` credits taken by a consume whose job never started.
    /// The balance never rises above the daily cap. Unknown accounts are left alone.
    pub async fn refund(&self, user: OwnerId, amount: i64) -> Result<i64, LedgerError> {
        let amount = amount.max(0);
        let now = crate::task_db::db::unix_timestamp();
        let refund = async {
            sqlx::query(
                r#"
                UPDATE credits
                SET balance = MIN(balance + ?1, ?2),
                    updated_at = ?3
                WHERE user_id = ?4
                "#,
            )
            .bind(amount)
            .bind(self.daily_cap)
            .bind(now)
            .bind(user)
            .execute(&self.pool)
            .await?;
            let balance: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM credits WHERE user_id = ?1")
                    .bind(user)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok::<_, sqlx::Error>(balance.unwrap_or(self.daily_cap))
        };
        match tokio::time::timeout(self.tx_timeout, refund).await {
            Ok(balance) => {
                let balance = balance?;
                tracing::info!(user, amount, balance, "credits refunded");
                Ok(balance)
            }
            Err(_) => Err(LedgerError::Timeout(self.tx_timeout)),
        }
    }

    pub(crate) async fn consume_at(
        &self,
        user: OwnerId,
        amount: i64,
        now: i64,
    ) -> Result<Consumed, LedgerError> {
        if self.is_unlimited_at(user, now).await? {
            return Ok(Consumed {
                remaining: 0,
                unlimited: true,
            });
        }

        let amount = amount.max(0);
        match tokio::time::timeout(self.tx_timeout, self.debit(user, amount, now)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(user, amount, "credit transaction timed out");
                Err(LedgerError::Timeout(self.tx_timeout))
            }
        }
    }

    async fn debit(&self, user: OwnerId, amount: i64, now: i64) -> Result<Consumed, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock for the rest of the transaction.
        sqlx::query(
            r#"
            INSERT INTO credits (user_id, balance, reset_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user)
        .bind(self.daily_cap)
        .bind(reset::next_utc_midnight(now))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (mut balance, mut reset_at): (i64, i64) = sqlx::query_as(
            r#"
            SELECT balance, reset_at FROM credits WHERE user_id = ?1
            "#,
        )
        .bind(user)
        .fetch_one(&mut *tx)
        .await?;

        if reset::is_due(reset_at, now) {
            balance = self.daily_cap;
            reset_at = reset::next_utc_midnight(now);
            tracing::debug!(user, reset_at, "daily credit reset");
        }

        if amount > balance {
            // A due reset is still persisted; the balance itself is not debited.
            self.store(&mut tx, user, balance, reset_at, now).await?;
            tx.commit().await?;
            return Err(LedgerError::InsufficientCredits { remaining: balance });
        }

        let remaining = balance - amount;
        self.store(&mut tx, user, remaining, reset_at, now).await?;
        tx.commit().await?;

        Ok(Consumed {
            remaining,
            unlimited: false,
        })
    }

    async fn store(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        user: OwnerId,
        balance: i64,
        reset_at: i64,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE credits
            SET balance = ?1,
                reset_at = ?2,
                updated_at = ?3
            WHERE user_id = ?4
            "#,
        )
        .bind(balance)
        .bind(reset_at)
        .bind(now)
        .bind(user)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
