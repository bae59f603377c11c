//! In-memory stand-ins for the messaging transport and the converter.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use convd_core::convert::{ConvertOutput, ConvertRequest, Converter};
use convd_core::notify::{ChatRef, Delivery, MessageRef, Notice, Transport};
use convd_core::task_db::Locale;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sent {
        chat: ChatRef,
        message: MessageRef,
        notice: Notice,
    },
    Edited {
        message: MessageRef,
        notice: Notice,
    },
    Deleted {
        message: MessageRef,
    },
    Delivered {
        chat: ChatRef,
        delivery: Delivery,
    },
}

/// Records every call; message ids are handed out sequentially.
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<Event>>,
    next_id: AtomicI64,
    pub fail_delivery: AtomicBool,
    held: AtomicBool,
    resumed: Notify,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Every notice sent or edited in, in order.
    pub fn notices(&self) -> Vec<Notice> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sent { notice, .. } | Event::Edited { notice, .. } => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Delivered { delivery, .. } => Some(delivery),
                _ => None,
            })
            .collect()
    }

    /// Queued positions pushed to one status message, in order.
    pub fn positions_for(&self, message: MessageRef) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Edited {
                    message: m,
                    notice: Notice::Queued { position, .. },
                } if m == message => Some(position),
                _ => None,
            })
            .collect()
    }

    pub fn status_message(chat: i64, id: i64) -> MessageRef {
        MessageRef {
            chat: ChatRef(chat),
            message_id: id,
        }
    }

    /// Make every `send` wait until `release_sends` is called.
    pub fn hold_sends(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_sends(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    async fn wait_if_held(&self) {
        loop {
            let resumed = self.resumed.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            resumed.await;
        }
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, chat: ChatRef, notice: Notice, _locale: Locale) -> Result<MessageRef> {
        self.wait_if_held().await;
        let message = MessageRef {
            chat,
            message_id: 1_000 + self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        self.push(Event::Sent {
            chat,
            message,
            notice,
        });
        Ok(message)
    }

    async fn edit(&self, message: MessageRef, notice: Notice, _locale: Locale) -> Result<()> {
        self.push(Event::Edited { message, notice });
        Ok(())
    }

    async fn delete(&self, message: MessageRef) -> Result<()> {
        self.push(Event::Deleted { message });
        Ok(())
    }

    async fn deliver(&self, chat: ChatRef, delivery: Delivery, _locale: Locale) -> Result<String> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(anyhow!("chat unavailable"));
        }
        let result_ref = format!("delivered:{}", delivery.result_ref);
        self.push(Event::Delivered { chat, delivery });
        Ok(result_ref)
    }
}

/// Converter whose calls block until the test releases them.
///
/// Each call records its file name, then waits for one permit from `gate`.
/// Concurrency of calls is tracked so tests can assert on the peak.
pub struct GatedConverter {
    gate: Arc<Semaphore>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl GatedConverter {
    /// Starts closed: nothing completes until `release` is called.
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Semaphore::new(0)),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
        })
    }

    /// Every call completes immediately.
    pub fn open() -> Arc<Self> {
        let c = Self::closed();
        c.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        c
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Sleep this long inside every call (after passing the gate).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for GatedConverter {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertOutput> {
        self.calls.lock().unwrap().push(request.file_name.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result: Result<ConvertOutput> = async {
            self.gate.acquire().await?.forget();
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(&request.file_name) {
                return Err(anyhow!("unsupported input"));
            }
            Ok(ConvertOutput {
                result_ref: format!("out:{}", request.file_ref),
                result_name: format!("{}.{}", request.file_name, request.target_format),
            })
        }
        .await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
