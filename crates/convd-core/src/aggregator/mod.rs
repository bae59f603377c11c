//! Burst aggregator.
//!
//! Inbound files are appended to a persisted collector task per [`CollectionKey`].
//! Every arrival re-arms that key's debounce timer; when it fires the burst is
//! finalized into group-choice or per-file tasks and the collector is deleted.
//!
//! The slot table (key → collector + armed timer) is held locked across the
//! store read-modify-write, so an arrival and a firing timer for the same key
//! never interleave. Notices go out after the lock is released.

mod choice;
mod finalize;
mod key;
mod window;

pub use key::CollectionKey;
pub use window::BurstWindows;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::notify::{MessageRef, Transport};
use crate::task_db::{
    BatchFile, Linkage, Locale, NewTask, OwnerId, Task, TaskDb, TaskId, TaskOptions, TaskState,
};

/// Result of [`Aggregator::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// No files were given.
    Empty,
    /// Files were added; the debounce timer is armed.
    Collecting { collector: TaskId, count: usize },
    /// A manual batch reached its declared size and was finalized on the spot.
    Finalized(Finalized),
}

/// A finalized burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub key: CollectionKey,
    /// Finalized by its timer rather than by reaching the declared size or a flush.
    pub timed_out: bool,
    pub received: usize,
    pub expected: Option<usize>,
    pub prepared: Vec<Prepared>,
}

/// Task created by finalization, waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Several files of one format: whole group or one by one.
    GroupChoice {
        task: TaskId,
        format: String,
        count: usize,
        message: Option<MessageRef>,
    },
    /// One file waiting for its target format.
    Single {
        task: TaskId,
        name: String,
        message: Option<MessageRef>,
    },
}

impl Prepared {
    pub fn task(&self) -> TaskId {
        match self {
            Prepared::GroupChoice { task, .. } | Prepared::Single { task, .. } => *task,
        }
    }

    fn set_message(&mut self, sent: Option<MessageRef>) {
        match self {
            Prepared::GroupChoice { message, .. } | Prepared::Single { message, .. } => {
                *message = sent
            }
        }
    }
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Slot {
    collector: TaskId,
    timer: Option<Armed>,
}

impl Slot {
    fn disarm(&mut self) {
        if let Some(armed) = self.timer.take() {
            armed.handle.abort();
        }
    }
}

struct Inner {
    db: TaskDb,
    transport: Arc<dyn Transport>,
    windows: BurstWindows,
    slots: Mutex<HashMap<CollectionKey, Slot>>,
    generation: AtomicU64,
    choices: Mutex<()>,
}

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    pub fn new(db: TaskDb, transport: Arc<dyn Transport>, windows: BurstWindows) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                transport,
                windows,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                choices: Mutex::new(()),
            }),
        }
    }

    /// Append `files` to the collector for `key` and restart its debounce timer.
    pub async fn accept(
        &self,
        key: CollectionKey,
        locale: Locale,
        files: Vec<BatchFile>,
    ) -> Result<AcceptOutcome> {
        if files.is_empty() {
            return Ok(AcceptOutcome::Empty);
        }
        let inner = &self.inner;
        let mut slots = inner.slots.lock().await;

        let mut collector = inner.load_or_create_collector(&slots, &key, locale).await?;
        let (count, expected) = match &mut collector.options.linkage {
            Some(Linkage::Collector {
                files: collected,
                expected,
                ..
            }) => {
                collected.extend(files);
                (collected.len(), *expected)
            }
            _ => anyhow::bail!("task {} is not a collector", collector.id),
        };
        inner
            .db
            .update_options(collector.id, &collector.options)
            .await
            .context("append files to collector")?;
        tracing::debug!(key = %key, collector = collector.id, count, "files collected");

        let slot = slots.entry(key.clone()).or_insert(Slot {
            collector: collector.id,
            timer: None,
        });
        slot.collector = collector.id;
        slot.disarm();

        if matches!(expected, Some(n) if count >= n) {
            slots.remove(&key);
            let pending = inner.finalize_collector(&key, collector.id, false).await?;
            drop(slots);
            return Ok(match pending {
                Some(p) => AcceptOutcome::Finalized(inner.announce(p).await),
                None => AcceptOutcome::Empty,
            });
        }

        let window = inner.windows.for_count(&key, count);
        if let Some(slot) = slots.get_mut(&key) {
            slot.timer = Some(inner.arm(key, window));
        }
        Ok(AcceptOutcome::Collecting {
            collector: collector.id,
            count,
        })
    }

    /// Start a manual batch of `expected` files for `owner`. Files already collected
    /// for the owner's manual key are kept.
    pub async fn begin_manual(&self, owner: OwnerId, locale: Locale, expected: usize) -> Result<TaskId> {
        let key = CollectionKey::Manual { owner };
        let inner = &self.inner;
        let mut slots = inner.slots.lock().await;

        let mut collector = inner.load_or_create_collector(&slots, &key, locale).await?;
        if let Some(Linkage::Collector { expected: e, .. }) = &mut collector.options.linkage {
            *e = Some(expected.max(1));
        }
        inner
            .db
            .update_options(collector.id, &collector.options)
            .await
            .context("declare manual batch")?;

        let armed = inner.arm(key.clone(), inner.windows.manual);
        let slot = slots.entry(key).or_insert(Slot {
            collector: collector.id,
            timer: None,
        });
        slot.collector = collector.id;
        slot.disarm();
        slot.timer = Some(armed);

        tracing::info!(owner, expected, collector = collector.id, "manual batch started");
        Ok(collector.id)
    }

    /// Finalize `key` right away, whatever its timer says.
    pub async fn finalize_now(&self, key: &CollectionKey) -> Result<Option<Finalized>> {
        let inner = &self.inner;
        let mut slots = inner.slots.lock().await;
        let collector = match slots.remove(key) {
            Some(mut slot) => {
                slot.disarm();
                Some(slot.collector)
            }
            None => inner.db.find_collector(key).await?.map(|t| t.id),
        };
        let pending = match collector {
            Some(id) => inner.finalize_collector(key, id, false).await?,
            None => None,
        };
        drop(slots);
        match pending {
            Some(p) => Ok(Some(inner.announce(p).await)),
            None => Ok(None),
        }
    }

    /// Single-file path: one task waiting for its target format, no debounce.
    pub async fn submit_single(&self, owner: OwnerId, locale: Locale, file: &BatchFile) -> Result<Prepared> {
        let (mut prepared, notice) = self.inner.prepare_single(owner, file, locale).await?;
        prepared.set_message(self.inner.notify(owner, notice, locale).await);
        Ok(prepared)
    }

    /// Number of keys with a live collector in this process.
    pub async fn pending(&self) -> usize {
        self.inner.slots.lock().await.len()
    }
}

impl Inner {
    async fn load_or_create_collector(
        &self,
        slots: &HashMap<CollectionKey, Slot>,
        key: &CollectionKey,
        locale: Locale,
    ) -> Result<Task> {
        let existing = match slots.get(key) {
            Some(slot) => self.db.get_task(slot.collector).await?,
            None => self.db.find_collector(key).await?,
        };
        if let Some(task) = existing {
            if task.collected_files().is_some() {
                return Ok(task);
            }
        }

        let new = NewTask {
            owner: key.owner(),
            state: TaskState::AwaitingFormat,
            file_ref: String::new(),
            file_name: String::new(),
            source_format: String::new(),
            target_format: String::new(),
            options: TaskOptions {
                linkage: Some(Linkage::Collector {
                    key: key.clone(),
                    files: Vec::new(),
                    expected: None,
                }),
                ..TaskOptions::with_locale(locale)
            },
        };
        let id = self.db.create_task(&new).await.context("create collector")?;
        tracing::debug!(key = %key, collector = id, "collector created");
        self.db
            .get_task(id)
            .await?
            .with_context(|| format!("collector {id} vanished"))
    }

    /// Spawn a timer that finalizes `key` after `window` unless re-armed first.
    fn arm(self: &Arc<Self>, key: CollectionKey, window: Duration) -> Armed {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(e) = inner.fire(&key, generation).await {
                tracing::error!(key = %key, "finalize burst: {:#}", e);
            }
        });
        Armed { generation, handle }
    }

    /// Timer callback. A timer that is no longer the armed one for its key does nothing.
    async fn fire(&self, key: &CollectionKey, generation: u64) -> Result<()> {
        let mut slots = self.slots.lock().await;
        let current = slots
            .get(key)
            .and_then(|s| s.timer.as_ref())
            .map(|t| t.generation);
        if current != Some(generation) {
            tracing::debug!(key = %key, generation, "stale burst timer ignored");
            return Ok(());
        }
        // Our own handle is dropped with the slot, not aborted.
        let Some(slot) = slots.remove(key) else {
            return Ok(());
        };
        let pending = self.finalize_collector(key, slot.collector, true).await?;
        drop(slots);
        if let Some(p) = pending {
            self.announce(p).await;
        }
        Ok(())
    }
}
