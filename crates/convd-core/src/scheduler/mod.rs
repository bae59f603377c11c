//! Job scheduler.
//!
//! Tasks enter through [`Scheduler::enqueue`] onto a priority or normal lane and
//! are run by a fixed pool of workers. Heavy tasks additionally pass a pool-wide
//! gate of one slot. Every queued task has an estimated position that is pushed
//! to its status message as workers pick up work.

mod broadcast;
mod execute;
mod heavy;
mod in_flight;
mod lanes;
mod recover;
mod worker;

pub use execute::JobFailure;
pub use recover::RecoveryReport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ConvdConfig;
use crate::convert::Converter;
use crate::notify::{MessageRef, Transport};
use crate::task_db::{Locale, TaskDb, TaskId};

use broadcast::Broadcaster;
use heavy::HeavyGate;
use in_flight::{InFlight, Update};
use lanes::Lanes;

/// Result of [`Scheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Registered; `position` is an estimate (0 = starts right away).
    Accepted { position: usize },
    /// The task is already enqueued or running; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub lane_capacity: usize,
    pub conversion_timeout: Duration,
    pub heavy_size_bytes: u64,
}

impl SchedulerOptions {
    pub fn from_config(cfg: &ConvdConfig) -> Self {
        Self {
            workers: cfg.worker_count(),
            lane_capacity: cfg.lane_capacity(),
            conversion_timeout: cfg.conversion_timeout(),
            heavy_size_bytes: cfg.heavy_size_bytes,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&ConvdConfig::default())
    }
}

/// State shared between the handle, workers and detached lane pushes.
pub(crate) struct Shared {
    db: TaskDb,
    converter: Arc<dyn Converter>,
    transport: Arc<dyn Transport>,
    options: SchedulerOptions,
    lanes: Lanes,
    in_flight: InFlight,
    heavy: HeavyGate,
    updates: Broadcaster,
    shutdown: CancellationToken,
}

impl Shared {
    /// Queue position edits for the status sender. Never blocks; failures are logged only.
    fn broadcast(&self, updates: Vec<Update>) {
        if !updates.is_empty() {
            self.updates.push(updates);
        }
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    started: AtomicBool,
    tasks: Mutex<JoinSet<()>>,
}

impl Scheduler {
    pub fn new(
        db: TaskDb,
        converter: Arc<dyn Converter>,
        transport: Arc<dyn Transport>,
        options: SchedulerOptions,
    ) -> Self {
        let options = SchedulerOptions {
            workers: options.workers.max(1),
            ..options
        };
        let lanes = Lanes::new(options.lane_capacity);
        Self {
            shared: Arc::new(Shared {
                db,
                converter,
                transport,
                options,
                lanes,
                in_flight: InFlight::default(),
                heavy: HeavyGate::new(),
                updates: Broadcaster::new(),
                shutdown: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn the workers and the startup recovery pass. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for index in 0..self.shared.options.workers {
            let shared = Arc::clone(&self.shared);
            tasks.spawn(worker::run_worker(index, shared));
        }

        if let Some(rx) = self.shared.updates.take_receiver() {
            tasks.spawn(broadcast::run(
                rx,
                Arc::clone(&self.shared.transport),
                self.shared.shutdown.clone(),
            ));
        }

        let shared = Arc::clone(&self.shared);
        tasks.spawn(async move {
            if let Err(e) = recover::recover(&shared).await {
                tracing::error!("startup recovery failed: {:#}", e);
            }
        });
        tracing::info!(workers = self.shared.options.workers, "scheduler started");
    }

    /// Re-enqueue tasks left in `processing` by a previous run.
    pub async fn recover(&self) -> anyhow::Result<RecoveryReport> {
        recover::recover(&self.shared).await
    }

    /// Register `task` and push it onto its lane in the background.
    ///
    /// Never blocks: when the lane is full the push waits on a detached task, which
    /// is abandoned (and the entry dropped) if the scheduler shuts down first.
    /// Must be called from within a tokio runtime.
    pub fn enqueue(
        &self,
        task: TaskId,
        status: Option<MessageRef>,
        name: impl Into<String>,
        locale: Locale,
        priority: bool,
    ) -> EnqueueOutcome {
        enqueue(&self.shared, task, status, name.into(), locale, priority)
    }

    /// Estimated position of an in-flight task (0 = running).
    pub fn position(&self, task: TaskId) -> Option<usize> {
        self.shared.in_flight.position(task)
    }

    pub fn in_flight_len(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.options.workers
    }

    /// Stop accepting work, interrupt running jobs and wait for the workers to exit.
    /// Interrupted tasks stay in `processing` and are picked up by the next recovery.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::warn!("scheduler task join: {}", e);
            }
        }
        tracing::info!("scheduler stopped");
    }
}

pub(crate) fn enqueue(
    shared: &Arc<Shared>,
    task: TaskId,
    status: Option<MessageRef>,
    name: String,
    locale: Locale,
    priority: bool,
) -> EnqueueOutcome {
    let Some(position) =
        shared
            .in_flight
            .admit(task, status, name, locale, priority, shared.options.workers)
    else {
        tracing::debug!(task, "already in flight");
        return EnqueueOutcome::Duplicate;
    };

    let tx = shared.lanes.sender(priority);
    let pusher = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = pusher.shutdown.cancelled() => {
                pusher.in_flight.finish(task);
                tracing::debug!(task, "lane push abandoned at shutdown");
            }
            sent = tx.send(task) => {
                if sent.is_err() {
                    pusher.in_flight.finish(task);
                    tracing::warn!(task, "lane closed; task dropped");
                }
            }
        }
    });

    tracing::debug!(task, priority, position, "enqueued");
    EnqueueOutcome::Accepted { position }
}
