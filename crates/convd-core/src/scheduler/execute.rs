//! One conversion: convert under a timeout, then deliver.

use std::time::Duration;
use thiserror::Error;

use crate::convert::{ConvertRequest, Converter};
use crate::notify::{Caption, ChatRef, Delivery, Notice, Transport};
use crate::task_db::{Task, TaskOptions};

/// Terminal failure of a job. The `Display` text is stored as the task's error.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("conversion timed out after {0:?}")]
    TimedOut(Duration),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl JobFailure {
    /// The single failure notice sent to the owner.
    pub fn notice(&self, name: &str) -> Notice {
        match self {
            JobFailure::Delivery(_) => Notice::DeliveryFailed {
                name: name.to_string(),
            },
            JobFailure::Conversion(reason) => Notice::ConversionFailed {
                name: name.to_string(),
                reason: reason.clone(),
            },
            JobFailure::TimedOut(_) => Notice::ConversionFailed {
                name: name.to_string(),
                reason: self.to_string(),
            },
        }
    }
}

fn caption(options: &TaskOptions) -> Caption {
    if options.unlimited {
        Caption::Unlimited
    } else if let Some(n) = options.credits_remaining {
        Caption::CreditsRemaining(n)
    } else {
        Caption::Plain
    }
}

/// Convert and deliver `task`. Returns the delivered result reference.
pub(crate) async fn run(
    converter: &dyn Converter,
    transport: &dyn Transport,
    timeout: Duration,
    task: &Task,
) -> Result<String, JobFailure> {
    let request = ConvertRequest::from(task);
    let output = match tokio::time::timeout(timeout, converter.convert(request)).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(JobFailure::Conversion(format!("{e:#}"))),
        Err(_) => return Err(JobFailure::TimedOut(timeout)),
    };

    let delivery = Delivery {
        result_ref: output.result_ref,
        result_name: output.result_name,
        caption: caption(&task.options),
    };
    transport
        .deliver(ChatRef(task.owner), delivery, task.options.locale)
        .await
        .map_err(|e| JobFailure::Delivery(format!("{e:#}")))
}
