//! Task read operations: get, list, collector lookup.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::super::db::TaskDb;
use super::super::types::{Linkage, OwnerId, Task, TaskId, TaskOptions, TaskState};
use crate::aggregator::CollectionKey;

const TASK_COLUMNS: &str = r#"
    id, owner_id, state, file_ref, file_name, source_format, target_format,
    options_json, result_ref, error, created_at, updated_at, expires_at
"#;

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let id: i64 = row.get("id");
    let options_json: Option<String> = row.get("options_json");
    let options = options_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str::<TaskOptions>)
        .transpose()
        .with_context(|| format!("task {id}: invalid options_json"))?
        .unwrap_or_default();
    let state_str: String = row.get("state");

    Ok(Task {
        id,
        owner: row.get("owner_id"),
        state: TaskState::from_str(&state_str),
        file_ref: row.get("file_ref"),
        file_name: row.get("file_name"),
        source_format: row.get("source_format"),
        target_format: row.get("target_format"),
        options,
        result_ref: row.get("result_ref"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        expires_at: row.get("expires_at"),
    })
}

impl TaskDb {
    /// Fetch a single task with its options.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// List all tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    /// List the tasks of one owner, oldest first.
    pub async fn list_owner_tasks(&self, owner: OwnerId) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 ORDER BY id ASC");
        let rows = sqlx::query(&sql).bind(owner).fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Tasks left in `processing` (e.g. after a crash), oldest first.
    /// Used by the scheduler's startup recovery.
    pub async fn list_processing_tasks(&self) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE state = ?1 ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(TaskState::Processing.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Most recent collector task persisted for `key`, if any survives.
    pub async fn find_collector(&self, key: &CollectionKey) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE owner_id = ?1 AND state = ?2 AND source_format = ''
             ORDER BY id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(key.owner())
            .bind(TaskState::AwaitingFormat.as_str())
            .fetch_all(&self.pool)
            .await?;

        for row in &rows {
            let task = task_from_row(row)?;
            if let Some(Linkage::Collector { key: k, .. }) = &task.options.linkage {
                if k == key {
                    return Ok(Some(task));
                }
            }
        }
        Ok(None)
    }
}
