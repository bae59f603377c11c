//! Types used by the task database.

use serde::{Deserialize, Serialize};

use crate::aggregator::CollectionKey;

/// Task identifier.
pub type TaskId = i64;

/// Identifier of the user owning a task or credit account.
pub type OwnerId = i64;

/// Lifecycle state stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    AwaitingFormat,
    Processing,
    Ready,
    Error,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::AwaitingFormat => "awaiting_format",
            TaskState::Processing => "processing",
            TaskState::Ready => "ready",
            TaskState::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "awaiting_format" => TaskState::AwaitingFormat,
            "processing" => TaskState::Processing,
            "ready" => TaskState::Ready,
            _ => TaskState::Error,
        }
    }
}

/// Language used for the user-facing templates of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    /// Lenient parse from a language tag such as "ru-RU"; anything unknown is English.
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        if tag == "ru" || tag.starts_with("ru-") || tag.starts_with("ru_") {
            Locale::Ru
        } else {
            Locale::En
        }
    }
}

/// One inbound file: opaque transport reference, display name, size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub file_ref: String,
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

impl BatchFile {
    pub fn new(file_ref: impl Into<String>, name: impl Into<String>, size: i64) -> Self {
        Self {
            file_ref: file_ref.into(),
            name: name.into(),
            size,
        }
    }
}

/// Format-specific conversion knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tuning {
    Resize { width: u32, height: u32 },
    Compress { quality: u8 },
    Crop { preset: String },
    Profile { preset: String },
}

/// How a group of same-format files will be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// The user has not answered the whole-group / separate question yet.
    #[default]
    Undecided,
    /// One target format for every file of the group.
    Whole,
}

/// Relationship of a task to a burst of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Linkage {
    /// Transient collector accumulating a burst under a collection key.
    Collector {
        key: CollectionKey,
        files: Vec<BatchFile>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<usize>,
    },
    /// Group job awaiting a single format decision for all of its files.
    Group {
        files: Vec<BatchFile>,
        #[serde(default)]
        mode: GroupMode,
    },
    /// Real job fanned out from a group job.
    Member { parent: TaskId },
}

/// Per-task options, stored as JSON in the DB.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default)]
    pub locale: Locale,
    /// Dispatch through the priority lane.
    #[serde(default)]
    pub priority: bool,
    /// Owner held an unlimited entitlement when the task was admitted.
    #[serde(default)]
    pub unlimited: bool,
    /// Explicitly resource-intensive regardless of format or size.
    #[serde(default)]
    pub heavy: bool,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_remaining: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<Tuning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkage: Option<Linkage>,
}

impl TaskOptions {
    pub fn with_locale(locale: Locale) -> Self {
        Self {
            locale,
            ..Self::default()
        }
    }
}

/// Full task record.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub owner: OwnerId,
    pub state: TaskState,
    pub file_ref: String,
    pub file_name: String,
    pub source_format: String,
    /// Empty until the format-selection step.
    pub target_format: String,
    pub options: TaskOptions,
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

impl Task {
    /// Files accumulated by a collector task, if this is one.
    pub fn collected_files(&self) -> Option<&[BatchFile]> {
        match &self.options.linkage {
            Some(Linkage::Collector { files, .. }) => Some(files),
            _ => None,
        }
    }

    /// Files of a group job, if this is one.
    pub fn group_files(&self) -> Option<&[BatchFile]> {
        match &self.options.linkage {
            Some(Linkage::Group { files, .. }) => Some(files),
            _ => None,
        }
    }
}

/// Fields supplied when inserting a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner: OwnerId,
    pub state: TaskState,
    pub file_ref: String,
    pub file_name: String,
    pub source_format: String,
    pub target_format: String,
    pub options: TaskOptions,
}

impl NewTask {
    /// A single file waiting for the user to pick a target format.
    pub fn awaiting_format(owner: OwnerId, file: &BatchFile, options: TaskOptions) -> Self {
        Self {
            owner,
            state: TaskState::AwaitingFormat,
            file_ref: file.file_ref.clone(),
            file_name: file.name.clone(),
            source_format: crate::formats::extension_of(&file.name),
            target_format: String::new(),
            options: TaskOptions {
                file_size: file.size,
                ..options
            },
        }
    }
}
