//! `convd grant <user> --days N` – activate or extend an unlimited plan.

use anyhow::Result;
use convd_core::config::ConvdConfig;
use convd_core::ledger::CreditLedger;
use convd_core::task_db::TaskDb;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub async fn run_grant(db: &TaskDb, cfg: &ConvdConfig, user: i64, days: u64) -> Result<()> {
    anyhow::ensure!(days > 0, "--days must be at least 1");
    let ledger = CreditLedger::new(db, &cfg.credits());
    let expires_at = ledger
        .grant_unlimited(user, Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
        .await?;
    println!("User {user}: unlimited until {expires_at} (unix time)");
    Ok(())
}
