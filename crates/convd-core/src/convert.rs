//! Converter seam: the core only knows references, formats and tuning.

use anyhow::Result;
use async_trait::async_trait;

use crate::task_db::{Task, Tuning};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    pub file_ref: String,
    pub file_name: String,
    pub source_format: String,
    pub target_format: String,
    pub tuning: Option<Tuning>,
}

impl From<&Task> for ConvertRequest {
    fn from(task: &Task) -> Self {
        Self {
            file_ref: task.file_ref.clone(),
            file_name: task.file_name.clone(),
            source_format: task.source_format.clone(),
            target_format: task.target_format.clone(),
            tuning: task.options.tuning.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOutput {
    pub result_ref: String,
    pub result_name: String,
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert one file. Cancelled by dropping the future when the scheduler's timeout expires.
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertOutput>;
}
