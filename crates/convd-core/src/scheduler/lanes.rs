//! Priority and normal lanes feeding the worker pool.

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::task_db::TaskId;

struct Receivers {
    priority: Receiver<TaskId>,
    normal: Receiver<TaskId>,
}

/// Two bounded FIFO queues. Workers share the receiving ends; whoever holds the
/// lock drains the priority lane before looking at the normal one.
pub(crate) struct Lanes {
    priority_tx: Sender<TaskId>,
    normal_tx: Sender<TaskId>,
    rx: Mutex<Receivers>,
}

impl Lanes {
    pub fn new(capacity: usize) -> Self {
        let (priority_tx, priority) = mpsc::channel(capacity.max(1));
        let (normal_tx, normal) = mpsc::channel(capacity.max(1));
        Self {
            priority_tx,
            normal_tx,
            rx: Mutex::new(Receivers { priority, normal }),
        }
    }

    pub fn sender(&self, priority: bool) -> Sender<TaskId> {
        if priority {
            self.priority_tx.clone()
        } else {
            self.normal_tx.clone()
        }
    }

    /// Next task id, priority lane first. None once `shutdown` is cancelled.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<TaskId> {
        let mut rx = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };

        if let Ok(id) = rx.priority.try_recv() {
            return Some(id);
        }

        let Receivers { priority, normal } = &mut *rx;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            Some(id) = priority.recv() => Some(id),
            Some(id) = normal.recv() => Some(id),
            else => None,
        }
    }
}
