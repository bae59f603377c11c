//! Turning a settled collector into tasks the user can act on.
//!
//! Tasks are created while the slot table is locked; their notices are sent by
//! [`Inner::announce`] once it is released.

use anyhow::{Context, Result};

use super::{CollectionKey, Finalized, Inner, Prepared};
use crate::formats;
use crate::notify::{ChatRef, MessageRef, Notice};
use crate::task_db::{
    BatchFile, GroupMode, Linkage, Locale, NewTask, OwnerId, TaskId, TaskOptions, TaskState,
};

/// Split files by group key, keeping first-arrival order of groups and of files.
pub(crate) fn group_by_format(files: &[BatchFile]) -> Vec<(String, Vec<BatchFile>)> {
    let mut groups: Vec<(String, Vec<BatchFile>)> = Vec::new();
    for file in files {
        let key = formats::group_key(&file.name);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(file.clone()),
            None => groups.push((key, vec![file.clone()])),
        }
    }
    groups
}

/// A finalization whose notices are still to be sent, one per prepared task.
pub(super) struct Unannounced {
    finalized: Finalized,
    owner: OwnerId,
    locale: Locale,
    notices: Vec<Notice>,
    shortfall: Option<Notice>,
}

impl Inner {
    /// Finalize the collector `id` for `key`. Returns None when the collector is gone.
    /// Nothing is sent to the user yet.
    pub(super) async fn finalize_collector(
        &self,
        key: &CollectionKey,
        id: TaskId,
        timed_out: bool,
    ) -> Result<Option<Unannounced>> {
        let Some(collector) = self.db.get_task(id).await? else {
            tracing::debug!(key = %key, collector = id, "collector already gone");
            return Ok(None);
        };
        let (files, expected) = match &collector.options.linkage {
            Some(Linkage::Collector {
                files, expected, ..
            }) => (files.clone(), *expected),
            _ => {
                tracing::warn!(collector = id, "finalize on a non-collector task");
                return Ok(None);
            }
        };
        let owner = collector.owner;
        let locale = collector.options.locale;

        let mut prepared = Vec::new();
        let mut notices = Vec::new();
        for (format, members) in group_by_format(&files) {
            if members.len() > 1 && formats::supports_group_choice(&format) {
                let (p, n) = self.prepare_group(owner, locale, format, members).await?;
                prepared.push(p);
                notices.push(n);
            } else {
                for file in &members {
                    let (p, n) = self.prepare_single(owner, file, locale).await?;
                    prepared.push(p);
                    notices.push(n);
                }
            }
        }

        let shortfall = expected
            .filter(|n| timed_out && files.len() < *n)
            .map(|expected| Notice::BatchShortfall {
                received: files.len(),
                expected,
            });

        self.db
            .delete_task(id)
            .await
            .context("delete collector")?;
        tracing::info!(
            key = %key,
            files = files.len(),
            tasks = prepared.len(),
            timed_out,
            "burst finalized"
        );

        Ok(Some(Unannounced {
            finalized: Finalized {
                key: key.clone(),
                timed_out,
                received: files.len(),
                expected,
                prepared,
            },
            owner,
            locale,
            notices,
            shortfall,
        }))
    }

    /// Send the notices of a finalization and record their messages.
    pub(super) async fn announce(&self, pending: Unannounced) -> Finalized {
        let Unannounced {
            mut finalized,
            owner,
            locale,
            notices,
            shortfall,
        } = pending;
        for (prepared, notice) in finalized.prepared.iter_mut().zip(notices) {
            prepared.set_message(self.notify(owner, notice, locale).await);
        }
        if let Some(notice) = shortfall {
            self.notify(owner, notice, locale).await;
        }
        finalized
    }

    async fn prepare_group(
        &self,
        owner: OwnerId,
        locale: Locale,
        format: String,
        files: Vec<BatchFile>,
    ) -> Result<(Prepared, Notice)> {
        let count = files.len();
        let file_size = files.iter().map(|f| f.size).sum();
        let task = self
            .db
            .create_task(&NewTask {
                owner,
                state: TaskState::AwaitingFormat,
                file_ref: String::new(),
                file_name: format!("{count} × {format}"),
                source_format: format.clone(),
                target_format: String::new(),
                options: TaskOptions {
                    file_size,
                    linkage: Some(Linkage::Group {
                        files,
                        mode: GroupMode::Undecided,
                    }),
                    ..TaskOptions::with_locale(locale)
                },
            })
            .await
            .context("create group task")?;

        let notice = Notice::BatchChoice {
            task,
            format: format.clone(),
            count,
        };
        let prepared = Prepared::GroupChoice {
            task,
            format,
            count,
            message: None,
        };
        Ok((prepared, notice))
    }

    /// Create a task waiting for its target format; the notice asks for the format.
    pub(super) async fn prepare_single(
        &self,
        owner: OwnerId,
        file: &BatchFile,
        locale: Locale,
    ) -> Result<(Prepared, Notice)> {
        let new = NewTask::awaiting_format(owner, file, TaskOptions::with_locale(locale));
        let format = new.source_format.clone();
        let task = self
            .db
            .create_task(&new)
            .await
            .context("create file task")?;

        let notice = Notice::ChooseFormat {
            task,
            name: file.name.clone(),
            targets: formats::targets_for(&format),
            format,
        };
        let prepared = Prepared::Single {
            task,
            name: file.name.clone(),
            message: None,
        };
        Ok((prepared, notice))
    }

    /// Best-effort send; failures are logged.
    pub(super) async fn notify(&self, owner: OwnerId, notice: Notice, locale: Locale) -> Option<MessageRef> {
        match self.transport.send(ChatRef(owner), notice, locale).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(owner, "notice not sent: {:#}", e);
                None
            }
        }
    }
}
