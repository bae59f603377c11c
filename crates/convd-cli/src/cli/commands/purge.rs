//! `convd purge` – delete expired tasks.

use anyhow::Result;
use convd_core::task_db::TaskDb;
use std::time::{SystemTime, UNIX_EPOCH};

pub async fn run_purge(db: &TaskDb) -> Result<()> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
    let removed = db.purge_expired(now).await?;
    tracing::info!(removed, "purged expired tasks");
    println!("Removed {removed} expired task(s)");
    Ok(())
}
