//! Unlimited-plan entitlements (the `subscriptions` table).

use std::time::Duration;

use super::{CreditLedger, LedgerError};
use crate::task_db::OwnerId;

const PLAN_UNLIMITED: &str = "unlimited";
const STATUS_ACTIVE: &str = "active";

impl CreditLedger {
    /// True if `user` holds an active, unexpired unlimited entitlement.
    pub async fn is_unlimited(&self, user: OwnerId) -> Result<bool, LedgerError> {
        self.is_unlimited_at(user, crate::task_db::db::unix_timestamp())
            .await
    }

    pub(crate) async fn is_unlimited_at(&self, user: OwnerId, now: i64) -> Result<bool, LedgerError> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM subscriptions
            WHERE user_id = ?1
              AND status = ?2
              AND plan = ?3
              AND (expires_at IS NULL OR expires_at > ?4)
            "#,
        )
        .bind(user)
        .bind(STATUS_ACTIVE)
        .bind(PLAN_UNLIMITED)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Activate an unlimited entitlement for `duration`, or extend a live one.
    /// Extension starts from the later of now and the current expiry.
    /// Returns the new expiry (Unix seconds).
    pub async fn grant_unlimited(&self, user: OwnerId, duration: Duration) -> Result<i64, LedgerError> {
        let now = crate::task_db::db::unix_timestamp();
        let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        let current: Option<(String, String, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT plan, status, expires_at FROM subscriptions WHERE user_id = ?1
            "#,
        )
        .bind(user)
        .fetch_optional(&mut *tx)
        .await?;

        let base = match current {
            Some((plan, status, Some(expires_at)))
                if plan == PLAN_UNLIMITED && status == STATUS_ACTIVE =>
            {
                expires_at.max(now)
            }
            _ => now,
        };
        let expires_at = base.saturating_add(secs);

        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan, status, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user)
        .bind(PLAN_UNLIMITED)
        .bind(STATUS_ACTIVE)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(user, expires_at, "unlimited entitlement granted");
        Ok(expires_at)
    }
}
