//! In-flight table: every enqueued or running task with its estimated position.
//!
//! Position 0 means running (or about to run on a free worker). A queued entry's
//! position is its rank among queued entries, priority lane first, arrival order
//! within a lane. Ranks are recomputed whenever an entry is picked up or removed;
//! an entry's position only ever moves down.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::notify::{MessageRef, Notice};
use crate::task_db::{Locale, TaskId};

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub status: Option<MessageRef>,
    pub name: String,
    pub locale: Locale,
    pub priority: bool,
    pub position: usize,
    seq: u64,
}

/// A status-message edit produced by a position change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Update {
    pub message: MessageRef,
    pub notice: Notice,
    pub locale: Locale,
}

#[derive(Default)]
struct Table {
    entries: HashMap<TaskId, Entry>,
    next_seq: u64,
}

#[derive(Default)]
pub(crate) struct InFlight {
    table: RwLock<Table>,
}

impl InFlight {
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task. Returns the estimated position, or None if it is already in flight.
    pub fn admit(
        &self,
        id: TaskId,
        status: Option<MessageRef>,
        name: String,
        locale: Locale,
        priority: bool,
        workers: usize,
    ) -> Option<usize> {
        let mut table = self.write();
        if table.entries.contains_key(&id) {
            return None;
        }

        let running = table.entries.values().filter(|e| e.position == 0).count();
        let position = if running < workers {
            0
        } else {
            // Priority entries only wait behind queued priority entries.
            1 + table
                .entries
                .values()
                .filter(|e| e.position > 0 && (e.priority || !priority))
                .count()
        };

        let seq = table.next_seq;
        table.next_seq += 1;
        table.entries.insert(
            id,
            Entry {
                status,
                name,
                locale,
                priority,
                position,
                seq,
            },
        );
        Some(position)
    }

    /// Attach a status message to an entry registered without one.
    pub fn attach_status(&self, id: TaskId, message: MessageRef) -> bool {
        match self.write().entries.get_mut(&id) {
            Some(entry) => {
                entry.status = Some(message);
                true
            }
            None => false,
        }
    }

    /// A worker picked up `id`: it becomes running and everyone queued behind it moves up.
    /// Returns the edits to broadcast, or None if `id` is not in flight.
    pub fn start(&self, id: TaskId) -> Option<Vec<Update>> {
        let mut table = self.write();
        let entry = table.entries.get_mut(&id)?;
        entry.position = 0;

        let mut updates = Vec::new();
        if let Some(message) = entry.status {
            updates.push(Update {
                message,
                notice: Notice::Started {
                    name: entry.name.clone(),
                },
                locale: entry.locale,
            });
        }
        updates.extend(rerank(&mut table.entries));
        Some(updates)
    }

    /// Drop `id` from the table. Returns the removed entry and the resulting edits.
    pub fn finish(&self, id: TaskId) -> (Option<Entry>, Vec<Update>) {
        let mut table = self.write();
        let removed = table.entries.remove(&id);
        let updates = match &removed {
            Some(entry) if entry.position > 0 => rerank(&mut table.entries),
            _ => Vec::new(),
        };
        (removed, updates)
    }

    pub fn position(&self, id: TaskId) -> Option<usize> {
        self.read().entries.get(&id).map(|e| e.position)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }
}

fn rerank(entries: &mut HashMap<TaskId, Entry>) -> Vec<Update> {
    let mut queued: Vec<(&TaskId, &mut Entry)> =
        entries.iter_mut().filter(|(_, e)| e.position > 0).collect();
    queued.sort_by_key(|(_, e)| (!e.priority, e.seq));

    let mut updates = Vec::new();
    for (rank, (_, entry)) in queued.into_iter().enumerate() {
        let rank = rank + 1;
        if rank >= entry.position {
            continue;
        }
        entry.position = rank;
        if let Some(message) = entry.status {
            updates.push(Update {
                message,
                notice: Notice::Queued {
                    name: entry.name.clone(),
                    position: rank,
                },
                locale: entry.locale,
            });
        }
    }
    updates
}
