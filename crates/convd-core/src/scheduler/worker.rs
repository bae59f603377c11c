use std::sync::Arc;

use super::execute;
use super::Shared;
use crate::notify::ChatRef;
use crate::task_db::{Task, TaskId, TaskState};

pub(super) async fn run_worker(index: usize, shared: Arc<Shared>) {
    tracing::debug!(worker = index, "worker up");
    while let Some(task) = shared.lanes.next(&shared.shutdown).await {
        process(index, &shared, task).await;
    }
    tracing::debug!(worker = index, "worker down");
}

async fn process(worker: usize, shared: &Shared, id: TaskId) {
    match shared.in_flight.start(id) {
        Some(updates) => shared.broadcast(updates),
        None => {
            tracing::warn!(worker, task = id, "dequeued task is not in flight");
            return;
        }
    }

    let task = match shared.db.get_task(id).await {
        Ok(Some(task)) if task.state == TaskState::Processing => task,
        Ok(Some(task)) => {
            tracing::warn!(worker, task = id, state = task.state.as_str(), "skipping task not in processing");
            finish(shared, id).await;
            return;
        }
        Ok(None) => {
            tracing::warn!(worker, task = id, "task vanished before it ran");
            finish(shared, id).await;
            return;
        }
        Err(e) => {
            tracing::error!(worker, task = id, "load task: {:#}", e);
            finish(shared, id).await;
            return;
        }
    };

    tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => {
            tracing::info!(worker, task = id, "interrupted by shutdown; left for recovery");
        }
        _ = run_task(worker, shared, &task) => {}
    }
    finish(shared, id).await;
}

async fn run_task(worker: usize, shared: &Shared, task: &Task) {
    let heavy = task.options.heavy
        || crate::formats::is_heavy(
            &task.source_format,
            &task.target_format,
            task.options.file_size,
            shared.options.heavy_size_bytes,
        );

    let _guard = if heavy {
        tracing::debug!(worker, task = task.id, busy = shared.heavy.is_busy(), "waiting for heavy slot");
        match shared.heavy.acquire().await {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::error!(worker, task = task.id, "heavy gate: {:#}", e);
                return;
            }
        }
    } else {
        None
    };

    tracing::info!(worker, task = task.id, heavy, from = %task.source_format, to = %task.target_format, "converting");
    let outcome = execute::run(
        shared.converter.as_ref(),
        shared.transport.as_ref(),
        shared.options.conversion_timeout,
        task,
    )
    .await;

    match outcome {
        Ok(result_ref) => {
            if let Err(e) = shared.db.set_ready(task.id, &result_ref).await {
                tracing::error!(task = task.id, "mark ready: {:#}", e);
            }
            tracing::info!(worker, task = task.id, "task ready");
        }
        Err(failure) => {
            tracing::warn!(worker, task = task.id, "task failed: {}", failure);
            if let Err(e) = shared.db.set_error(task.id, &failure.to_string()).await {
                tracing::error!(task = task.id, "mark error: {:#}", e);
            }
            let notice = failure.notice(&task.file_name);
            if let Err(e) = shared
                .transport
                .send(ChatRef(task.owner), notice, task.options.locale)
                .await
            {
                tracing::warn!(task = task.id, "failure notice not sent: {:#}", e);
            }
        }
    }
}

/// Drop the in-flight entry, delete its status message and push the new positions.
async fn finish(shared: &Shared, id: TaskId) {
    let (entry, updates) = shared.in_flight.finish(id);
    shared.broadcast(updates);
    if let Some(message) = entry.and_then(|e| e.status) {
        if let Err(e) = shared.transport.delete(message).await {
            tracing::warn!(task = id, "status message not deleted: {:#}", e);
        }
    }
}
