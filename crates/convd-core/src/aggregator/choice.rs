//! The user's answer to a group choice.

use anyhow::{bail, Context, Result};

use super::{Aggregator, Prepared};
use crate::formats;
use crate::notify::Notice;
use crate::task_db::{GroupMode, Linkage, OwnerId, Task, TaskId, TaskState};

impl Aggregator {
    /// "Handle each file separately": replace the group task with one task per file.
    pub async fn choose_separately(&self, owner: OwnerId, group: TaskId) -> Result<Vec<Prepared>> {
        let inner = &self.inner;
        let serial = inner.choices.lock().await;
        let task = self.undecided_group(owner, group).await?;
        let Some(files) = task.group_files() else {
            bail!("task {group} is not a group");
        };

        let locale = task.options.locale;
        let mut created = Vec::with_capacity(files.len());
        for file in files {
            created.push(inner.prepare_single(owner, file, locale).await?);
        }
        inner
            .db
            .delete_task(group)
            .await
            .context("delete group task")?;
        drop(serial);
        tracing::info!(owner, group, files = created.len(), "group split into single files");

        let mut prepared = Vec::with_capacity(created.len());
        for (mut p, notice) in created {
            p.set_message(inner.notify(owner, notice, locale).await);
            prepared.push(p);
        }
        Ok(prepared)
    }

    /// "One target format for the whole group": record the mode and ask for the format.
    pub async fn choose_whole_group(&self, owner: OwnerId, group: TaskId) -> Result<Prepared> {
        let inner = &self.inner;
        let serial = inner.choices.lock().await;
        let mut task = self.undecided_group(owner, group).await?;
        let count = match &mut task.options.linkage {
            Some(Linkage::Group { files, mode }) => {
                *mode = GroupMode::Whole;
                files.len()
            }
            _ => bail!("task {group} is not a group"),
        };
        inner
            .db
            .update_options(group, &task.options)
            .await
            .context("record whole-group mode")?;

        let notice = Notice::ChooseFormat {
            task: group,
            name: task.file_name.clone(),
            format: task.source_format.clone(),
            targets: formats::targets_for(&task.source_format),
        };
        drop(serial);
        let message = inner.notify(owner, notice, task.options.locale).await;
        tracing::info!(owner, group, count, "whole-group conversion chosen");
        Ok(Prepared::GroupChoice {
            task: group,
            format: task.source_format,
            count,
            message,
        })
    }

    async fn undecided_group(&self, owner: OwnerId, group: TaskId) -> Result<Task> {
        let Some(task) = self.inner.db.get_task(group).await? else {
            bail!("group task {group} not found");
        };
        if task.owner != owner {
            bail!("group task {group} belongs to another user");
        }
        match &task.options.linkage {
            Some(Linkage::Group {
                mode: GroupMode::Undecided,
                ..
            }) if task.state == TaskState::AwaitingFormat => Ok(task),
            Some(Linkage::Group { .. }) => bail!("group task {group} already decided"),
            _ => bail!("task {group} is not a group"),
        }
    }
}
