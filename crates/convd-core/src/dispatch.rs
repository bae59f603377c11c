//! Format selection: the path from a waiting task to the scheduler.
//!
//! Credits are consumed before anything is enqueued; unlimited accounts go to the
//! priority lane. A task is claimed for the whole selection, so concurrent taps on
//! the same task pay once. Credits taken for a transition that then loses or fails
//! are refunded.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::aggregator::{Aggregator, Prepared};
use crate::formats;
use crate::ledger::{Consumed, CreditLedger, LedgerError};
use crate::notify::{ChatRef, MessageRef, Notice, Transport};
use crate::scheduler::{EnqueueOutcome, Scheduler};
use crate::task_db::{
    BatchFile, Linkage, Locale, NewTask, OwnerId, Task, TaskDb, TaskId, TaskOptions, TaskState,
    Tuning,
};

/// Result of [`Dispatcher::select_format`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Enqueued { task: TaskId, position: usize },
    /// A whole-group choice became one task per file.
    FannedOut { tasks: Vec<TaskId> },
    AlreadyInFlight,
    /// The target format was already set.
    AlreadyChosen,
    InsufficientCredits { remaining: i64 },
}

pub struct Dispatcher {
    db: TaskDb,
    ledger: CreditLedger,
    scheduler: Arc<Scheduler>,
    aggregator: Aggregator,
    transport: Arc<dyn Transport>,
    claims: Mutex<HashSet<TaskId>>,
}

/// Exclusive right to run a selection for one task; released on drop.
struct Claim<'a> {
    claims: &'a Mutex<HashSet<TaskId>>,
    task: TaskId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task);
    }
}

impl Dispatcher {
    pub fn new(
        db: TaskDb,
        ledger: CreditLedger,
        scheduler: Arc<Scheduler>,
        aggregator: Aggregator,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            db,
            ledger,
            scheduler,
            aggregator,
            transport,
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// A lone file, submitted outside any burst.
    pub async fn submit_file(&self, owner: OwnerId, locale: Locale, file: BatchFile) -> Result<Prepared> {
        self.aggregator.submit_single(owner, locale, &file).await
    }

    /// Attach conversion knobs to a task that is still waiting for its format.
    pub async fn set_tuning(&self, owner: OwnerId, task: TaskId, tuning: Tuning) -> Result<bool> {
        let mut t = self.owned_task(owner, task).await?;
        if t.state != TaskState::AwaitingFormat {
            return Ok(false);
        }
        t.options.tuning = Some(tuning);
        self.db.update_options(task, &t.options).await?;
        Ok(true)
    }

    /// Pick `target` for `task`, pay for it and hand it to the scheduler.
    ///
    /// `status` is the message the choice was made from; it becomes the task's status
    /// message and receives position updates.
    pub async fn select_format(
        &self,
        owner: OwnerId,
        task: TaskId,
        target: &str,
        status: Option<MessageRef>,
    ) -> Result<Selection> {
        let Some(_claim) = self.claim(task) else {
            tracing::debug!(owner, task, "selection already under way");
            return Ok(Selection::AlreadyInFlight);
        };
        let t = self.owned_task(owner, task).await?;
        if self.scheduler.position(task).is_some() {
            return Ok(Selection::AlreadyInFlight);
        }
        if t.state != TaskState::AwaitingFormat || !t.target_format.is_empty() {
            return Ok(Selection::AlreadyChosen);
        }
        if matches!(t.options.linkage, Some(Linkage::Collector { .. })) {
            bail!("task {task} is still collecting files");
        }

        let target = formats::normalize(target);
        if !formats::targets_for(&t.source_format).contains(&target) {
            bail!("cannot convert {} to {}", t.source_format, target);
        }

        let cost = match t.group_files() {
            Some(files) => files
                .iter()
                .map(|f| formats::credits_for(&t.source_format, &target, f.size))
                .sum::<i64>(),
            None => formats::credits_for(&t.source_format, &target, t.options.file_size),
        };
        let consumed = match self.ledger.consume(owner, cost).await {
            Ok(c) => c,
            Err(LedgerError::InsufficientCredits { remaining }) => {
                tracing::info!(owner, task, cost, remaining, "not enough credits");
                return Ok(Selection::InsufficientCredits { remaining });
            }
            Err(e) => return Err(e).context("consume credits"),
        };
        let charge = Charge {
            owner,
            cost,
            consumed,
        };

        if t.group_files().is_some() {
            return self.fan_out(t, &target, charge, status).await;
        }

        let mut options = t.options.clone();
        apply_plan(&mut options, consumed);
        let started = async {
            self.db.update_options(task, &options).await?;
            self.db.begin_processing(task, &target).await
        }
        .await;
        match started {
            Ok(true) => {}
            Ok(false) => {
                self.refund(charge).await;
                return Ok(Selection::AlreadyChosen);
            }
            Err(e) => {
                self.refund(charge).await;
                return Err(e).context("start processing");
            }
        }

        match self.scheduler.enqueue(
            task,
            status,
            t.file_name.clone(),
            options.locale,
            options.priority,
        ) {
            EnqueueOutcome::Accepted { position } => {
                if let Some(message) = status {
                    let notice = Notice::Queued {
                        name: t.file_name.clone(),
                        position,
                    };
                    if let Err(e) = self.transport.edit(message, notice, options.locale).await {
                        tracing::warn!(task, "status message not updated: {:#}", e);
                    }
                }
                Ok(Selection::Enqueued { task, position })
            }
            EnqueueOutcome::Duplicate => Ok(Selection::AlreadyInFlight),
        }
    }

    /// Replace a whole-group task by one processing task per file, then enqueue them.
    async fn fan_out(
        &self,
        group: Task,
        target: &str,
        charge: Charge,
        status: Option<MessageRef>,
    ) -> Result<Selection> {
        let files = group.group_files().unwrap_or_default();
        let locale = group.options.locale;
        let unlimited = charge.consumed.unlimited;

        let members: Vec<NewTask> = files
            .iter()
            .map(|file| {
                let mut options = TaskOptions {
                    file_size: file.size,
                    tuning: group.options.tuning.clone(),
                    linkage: Some(Linkage::Member { parent: group.id }),
                    ..TaskOptions::with_locale(locale)
                };
                apply_plan(&mut options, charge.consumed);
                NewTask {
                    owner: group.owner,
                    state: TaskState::Processing,
                    file_ref: file.file_ref.clone(),
                    file_name: file.name.clone(),
                    source_format: formats::extension_of(&file.name),
                    target_format: target.to_string(),
                    options,
                }
            })
            .collect();

        let tasks = match self.db.replace_group(group.id, &members).await {
            Ok(Some(ids)) => ids,
            Ok(None) => {
                self.refund(charge).await;
                return Ok(Selection::AlreadyChosen);
            }
            Err(e) => {
                self.refund(charge).await;
                return Err(e).context("fan out group");
            }
        };
        for (id, member) in tasks.iter().zip(&members) {
            self.scheduler
                .enqueue(*id, None, member.file_name.clone(), locale, unlimited);
        }

        let notice = Notice::BatchStarted { count: tasks.len() };
        let sent = match status {
            Some(message) => self.transport.edit(message, notice, locale).await,
            None => self
                .transport
                .send(ChatRef(group.owner), notice, locale)
                .await
                .map(|_| ()),
        };
        if let Err(e) = sent {
            tracing::warn!(group = group.id, "batch notice not sent: {:#}", e);
        }
        tracing::info!(group = group.id, members = tasks.len(), to = target, "group fanned out");
        Ok(Selection::FannedOut { tasks })
    }

    fn claim(&self, task: TaskId) -> Option<Claim<'_>> {
        let fresh = self
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task);
        if !fresh {
            return None;
        }
        Some(Claim {
            claims: &self.claims,
            task,
        })
    }

    async fn refund(&self, charge: Charge) {
        if charge.consumed.unlimited || charge.cost == 0 {
            return;
        }
        if let Err(e) = self.ledger.refund(charge.owner, charge.cost).await {
            tracing::error!(owner = charge.owner, cost = charge.cost, "refund failed: {}", e);
        }
    }

    async fn owned_task(&self, owner: OwnerId, task: TaskId) -> Result<Task> {
        match self.db.get_task(task).await? {
            Some(t) if t.owner == owner => Ok(t),
            Some(_) => bail!("task {task} belongs to another user"),
            None => bail!("task {task} not found"),
        }
    }
}

/// What one selection paid.
#[derive(Debug, Clone, Copy)]
struct Charge {
    owner: OwnerId,
    cost: i64,
    consumed: Consumed,
}

/// Record the plan the task was paid under.
fn apply_plan(options: &mut TaskOptions, consumed: Consumed) {
    options.priority = consumed.unlimited;
    options.unlimited = consumed.unlimited;
    options.credits_remaining = (!consumed.unlimited).then_some(consumed.remaining);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_marks_unlimited_as_priority() {
        let mut o = TaskOptions::default();
        apply_plan(
            &mut o,
            Consumed {
                remaining: 0,
                unlimited: true,
            },
        );
        assert!(o.priority && o.unlimited);
        assert_eq!(o.credits_remaining, None);

        apply_plan(
            &mut o,
            Consumed {
                remaining: 7,
                unlimited: false,
            },
        );
        assert!(!o.priority);
        assert_eq!(o.credits_remaining, Some(7));
    }
}
