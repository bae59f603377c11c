#![allow(dead_code)]

pub mod fakes;

use std::time::Duration;

use convd_core::task_db::{BatchFile, NewTask, TaskDb, TaskId, TaskOptions, TaskState};
use tempfile::TempDir;

/// File-backed database in a fresh temp dir (kept alive by the returned guard).
pub async fn temp_db() -> (TempDir, TaskDb) {
    let dir = tempfile::tempdir().unwrap();
    let db = TaskDb::open_at(dir.path().join("convd.db")).await.unwrap();
    (dir, db)
}

/// Insert a task that is ready to run: target chosen, state `processing`.
pub async fn processing_task(db: &TaskDb, owner: i64, name: &str, target: &str) -> TaskId {
    processing_task_with(db, owner, name, target, TaskOptions::default()).await
}

pub async fn processing_task_with(
    db: &TaskDb,
    owner: i64,
    name: &str,
    target: &str,
    options: TaskOptions,
) -> TaskId {
    let file = BatchFile::new(format!("ref:{name}"), name, 1024);
    let mut new = NewTask::awaiting_format(owner, &file, options);
    new.state = TaskState::Processing;
    new.target_format = target.to_string();
    db.create_task(&new).await.unwrap()
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn state_of(db: &TaskDb, id: TaskId) -> Option<TaskState> {
    db.get_task(id).await.unwrap().map(|t| t.state)
}
