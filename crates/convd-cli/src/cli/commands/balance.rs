//! `convd balance <user>` – show remaining credits.

use anyhow::Result;
use convd_core::config::ConvdConfig;
use convd_core::ledger::CreditLedger;
use convd_core::task_db::TaskDb;

pub async fn run_balance(db: &TaskDb, cfg: &ConvdConfig, user: i64) -> Result<()> {
    let ledger = CreditLedger::new(db, &cfg.credits());
    let balance = ledger.get_or_reset_balance(user).await?;
    if balance.unlimited {
        println!("User {user}: unlimited plan");
    } else {
        println!(
            "User {user}: {} of {} credits left today",
            balance.remaining,
            ledger.daily_cap()
        );
    }
    Ok(())
}
