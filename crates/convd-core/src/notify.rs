//! Messaging transport seam.
//!
//! The core never renders text: it hands the transport a typed [`Notice`] plus the
//! task's [`Locale`], and the transport picks the template.

use anyhow::Result;
use async_trait::async_trait;

use crate::task_db::{Locale, OwnerId, TaskId};

/// Conversation a notice is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatRef(pub i64);

impl From<OwnerId> for ChatRef {
    fn from(owner: OwnerId) -> Self {
        ChatRef(owner)
    }
}

/// A message previously sent through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatRef,
    pub message_id: i64,
}

/// Template parameters for one user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Waiting in line; `position` is an estimate.
    Queued { name: String, position: usize },
    Started { name: String },
    ConversionFailed { name: String, reason: String },
    DeliveryFailed { name: String },
    /// Ask for a target format for one file.
    ChooseFormat {
        task: TaskId,
        name: String,
        format: String,
        targets: Vec<String>,
    },
    /// Ask whether `count` files of `format` share one target or are handled separately.
    BatchChoice {
        task: TaskId,
        format: String,
        count: usize,
    },
    /// A manual batch timed out before every declared file arrived.
    BatchShortfall { received: usize, expected: usize },
    BatchStarted { count: usize },
}

/// Typed plan line attached to a delivered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caption {
    Unlimited,
    CreditsRemaining(i64),
    Plain,
}

/// A converted result ready to be sent back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub result_ref: String,
    pub result_name: String,
    pub caption: Caption,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a new status message and return its reference.
    async fn send(&self, chat: ChatRef, notice: Notice, locale: Locale) -> Result<MessageRef>;

    /// Replace the content of an existing status message.
    async fn edit(&self, message: MessageRef, notice: Notice, locale: Locale) -> Result<()>;

    async fn delete(&self, message: MessageRef) -> Result<()>;

    /// Send the converted file. Returns the transport's reference to the delivered result.
    async fn deliver(&self, chat: ChatRef, delivery: Delivery, locale: Locale) -> Result<String>;
}
