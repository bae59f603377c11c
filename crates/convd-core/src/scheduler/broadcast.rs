//! Status-message edits, delivered in the order they were produced.
//!
//! Position changes are queued on one channel and a single task sends them, so a
//! later position can never overtake an earlier one on its way to the transport.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::in_flight::Update;
use crate::notify::Transport;

pub(crate) struct Broadcaster {
    tx: UnboundedSender<Update>,
    rx: Mutex<Option<UnboundedReceiver<Update>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue edits without waiting for the transport.
    pub fn push(&self, updates: Vec<Update>) {
        for u in updates {
            if self.tx.send(u).is_err() {
                tracing::debug!("status sender stopped; edit dropped");
                return;
            }
        }
    }

    /// The receiving end, handed out once to [`run`].
    pub fn take_receiver(&self) -> Option<UnboundedReceiver<Update>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Send queued edits one at a time until shutdown. Edits already queued when the
/// token fires are still sent. Failures are logged only.
pub(crate) async fn run(
    mut rx: UnboundedReceiver<Update>,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            biased;
            u = rx.recv() => match u {
                Some(u) => u,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        if let Err(e) = transport.edit(update.message, update.notice, update.locale).await {
            tracing::warn!(message = update.message.message_id, "status update failed: {:#}", e);
        }
    }
}
