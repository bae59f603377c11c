//! SQLite-backed task database implementation.
//!
//! Handles connection, migrations, and timestamp helpers. Task CRUD lives in `tasks`;
//! the credit tables created here are owned by `crate::ledger`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_TASK_TTL_SECS: i64 = 24 * 60 * 60;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite-backed task database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/convd/convd.db`.
#[derive(Clone)]
pub struct TaskDb {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) task_ttl_secs: i64,
}

impl TaskDb {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("convd")?;
        let state_dir = xdg_dirs.get_state_home();
        Self::open_at(state_dir.join("convd.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let db = TaskDb {
            pool,
            task_ttl_secs: DEFAULT_TASK_TTL_SECS,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Retention applied to tasks created from now on.
    pub fn with_task_ttl(mut self, secs: u64) -> Self {
        self.task_ttl_secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self
    }

    async fn migrate(&self) -> Result<()> {
        // - `options_json` holds the typed per-task options as JSON.
        // - `target_format` is '' until the format-selection step.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                file_ref TEXT NOT NULL DEFAULT '',
                file_name TEXT NOT NULL DEFAULT '',
                source_format TEXT NOT NULL DEFAULT '',
                target_format TEXT NOT NULL DEFAULT '',
                options_json TEXT,
                result_ref TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS tasks_owner_state ON tasks (owner_id, state);
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Daily credit balance per user; `reset_at` is the next UTC midnight.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credits (
                user_id INTEGER PRIMARY KEY,
                balance INTEGER NOT NULL CHECK (balance >= 0),
                reset_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Unlimited entitlements; NULL `expires_at` never expires.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER PRIMARY KEY,
                plan TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at INTEGER,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<TaskDb> {
    // Single connection to avoid the pool handing back a different empty DB.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = TaskDb {
        pool,
        task_ttl_secs: DEFAULT_TASK_TTL_SECS,
    };
    db.migrate().await?;
    Ok(db)
}
