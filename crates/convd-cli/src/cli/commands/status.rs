//! `convd status` – list stored tasks.

use anyhow::Result;
use convd_core::task_db::TaskDb;

pub async fn run_status(db: &TaskDb, owner: Option<i64>) -> Result<()> {
    let tasks = match owner {
        Some(owner) => db.list_owner_tasks(owner).await?,
        None => db.list_tasks().await?,
    };
    if tasks.is_empty() {
        println!("No tasks in database.");
        return Ok(());
    }

    println!(
        "{:<6} {:<10} {:<16} {:<12} {}",
        "ID", "OWNER", "STATE", "CONVERSION", "FILE"
    );
    for t in tasks {
        let conversion = if t.target_format.is_empty() {
            format!("{} → ?", or_dash(&t.source_format))
        } else {
            format!("{} → {}", or_dash(&t.source_format), t.target_format)
        };
        let mut line = format!(
            "{:<6} {:<10} {:<16} {:<12} {}",
            t.id,
            t.owner,
            t.state.as_str(),
            conversion,
            or_dash(&t.file_name)
        );
        if let Some(err) = &t.error {
            line.push_str(&format!("  ({err})"));
        }
        println!("{line}");
    }
    Ok(())
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
