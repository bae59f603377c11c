//! Task write operations: create, options, state transitions, group fan-out, delete, purge.

use anyhow::{Context, Result};
use sqlx::{Executor, Sqlite};

use super::super::db::{unix_timestamp, TaskDb};
use super::super::types::{NewTask, TaskId, TaskOptions, TaskState};

impl TaskDb {
    /// Insert a new task. `expires_at` is derived from the database's task TTL.
    pub async fn create_task(&self, task: &NewTask) -> Result<TaskId> {
        insert_task(&self.pool, task, self.task_ttl_secs).await
    }

    /// Replace an undecided group task by its member tasks, in one transaction.
    ///
    /// The group row is claimed by deleting it while it still waits for a format.
    /// Returns None (and inserts nothing) when the group is gone or already decided.
    /// On any error nothing is committed: the group stays and no member exists.
    pub async fn replace_group(&self, group: TaskId, members: &[NewTask]) -> Result<Option<Vec<TaskId>>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE id = ?1
              AND state = ?2
              AND target_format = ''
            "#,
        )
        .bind(group)
        .bind(TaskState::AwaitingFormat.as_str())
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            let id = insert_task(&mut *tx, member, self.task_ttl_secs)
                .await
                .with_context(|| format!("insert member of group {group}"))?;
            ids.push(id);
        }
        tx.commit().await?;
        Ok(Some(ids))
    }

    /// Replace the options of an existing task.
    pub async fn update_options(&self, id: TaskId, options: &TaskOptions) -> Result<()> {
        let now = unix_timestamp();
        let options_json = serde_json::to_string(options)?;
        sqlx::query(
            r#"
            UPDATE tasks
            SET options_json = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(options_json)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set the target format and move `awaiting_format` → `processing` in one statement.
    /// Returns false when the task is not waiting for a format (target already chosen,
    /// or the task is gone), so the target can never be set twice.
    pub async fn begin_processing(&self, id: TaskId, target_format: &str) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE tasks
            SET target_format = ?1,
                state = ?2,
                updated_at = ?3
            WHERE id = ?4
              AND state = ?5
              AND target_format = ''
            "#,
        )
        .bind(crate::formats::normalize(target_format))
        .bind(TaskState::Processing.as_str())
        .bind(now)
        .bind(id)
        .bind(TaskState::AwaitingFormat.as_str())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Mark a task converted and delivered.
    pub async fn set_ready(&self, id: TaskId, result_ref: &str) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?1,
                result_ref = ?2,
                error = NULL,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(TaskState::Ready.as_str())
        .bind(result_ref)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a task failed with a message.
    pub async fn set_error(&self, id: TaskId, message: &str) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?1,
                error = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(TaskState::Error.as_str())
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Permanently remove a task row.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete every task whose retention expired before `now` (Unix seconds),
    /// except tasks still processing. Returns the number of rows removed.
    pub async fn purge_expired(&self, now: i64) -> Result<u64> {
        let r = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE expires_at <= ?1
              AND state != ?2
            "#,
        )
        .bind(now)
        .bind(TaskState::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}

async fn insert_task<'e, E>(executor: E, task: &NewTask, ttl_secs: i64) -> Result<TaskId>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = unix_timestamp();
    let options_json = serde_json::to_string(&task.options)?;

    let row_id = sqlx::query(
        r#"
        INSERT INTO tasks (
            owner_id, state, file_ref, file_name, source_format, target_format,
            options_json, result_ref, error, created_at, updated_at, expires_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                  ?7, NULL, NULL, ?8, ?9, ?10)
        "#,
    )
    .bind(task.owner)
    .bind(task.state.as_str())
    .bind(&task.file_ref)
    .bind(&task.file_name)
    .bind(&task.source_format)
    .bind(&task.target_format)
    .bind(options_json)
    .bind(now)
    .bind(now)
    .bind(now.saturating_add(ttl_secs))
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(row_id)
}
