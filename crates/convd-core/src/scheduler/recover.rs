//! Startup recovery: re-enqueue tasks a previous run left in `processing`.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::{enqueue, EnqueueOutcome, Shared};
use crate::notify::{ChatRef, Notice};

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    /// Already in flight in this process.
    pub duplicates: usize,
    /// Processing tasks without a target format, or group tasks caught mid fan-out.
    pub skipped: usize,
}

pub(super) async fn recover(shared: &Arc<Shared>) -> Result<RecoveryReport> {
    let tasks = shared
        .db
        .list_processing_tasks()
        .await
        .context("list processing tasks")?;

    let mut report = RecoveryReport::default();
    for task in tasks {
        if task.target_format.is_empty() || task.group_files().is_some() {
            tracing::warn!(task = task.id, "processing task cannot run on its own; skipped");
            report.skipped += 1;
            continue;
        }

        let locale = task.options.locale;
        let position = match enqueue(
            shared,
            task.id,
            None,
            task.file_name.clone(),
            locale,
            task.options.priority,
        ) {
            EnqueueOutcome::Accepted { position } => position,
            EnqueueOutcome::Duplicate => {
                report.duplicates += 1;
                continue;
            }
        };
        report.requeued += 1;

        // Fresh status message; the one from the previous run is gone with its entry.
        let notice = Notice::Queued {
            name: task.file_name.clone(),
            position,
        };
        match shared.transport.send(ChatRef(task.owner), notice, locale).await {
            Ok(message) => {
                // Already finished: nobody else will remove the message.
                if !shared.in_flight.attach_status(task.id, message) {
                    if let Err(e) = shared.transport.delete(message).await {
                        tracing::warn!(task = task.id, "stale status not deleted: {:#}", e);
                    }
                }
            }
            Err(e) => tracing::warn!(task = task.id, "recovery status not sent: {:#}", e),
        }
    }

    if report.requeued > 0 || report.skipped > 0 {
        tracing::info!(
            requeued = report.requeued,
            skipped = report.skipped,
            "recovered interrupted tasks"
        );
    }
    Ok(report)
}
