//! Completion polling against `/history/{prompt_id}`.

use comfyjob_core::config::{CompletionPolicy, RetryBudget};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::HistoryRecord;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The history never satisfied the completion policy.
    #[error("prompt {prompt_id} did not complete after {attempts} history polls")]
    Timeout { prompt_id: String, attempts: u32 },

    /// ComfyUI returned a record that cannot be decoded. Polling again
    /// would see the same record, so this ends the poll.
    #[error(transparent)]
    Malformed(ComfyUIApiError),
}

/// Poll the history of `prompt_id` until `policy` holds.
///
/// `node_count` is the number of nodes in the submitted workflow (used by
/// [`CompletionPolicy::AllNodesTimed`]). Transport errors and error
/// statuses are logged and count as a failed attempt.
pub async fn poll_completion(
    api: &ComfyUIApi,
    prompt_id: &str,
    budget: &RetryBudget,
    policy: CompletionPolicy,
    node_count: usize,
) -> Result<HistoryRecord, PollError> {
    for attempt in 1..=budget.max_attempts {
        match api.get_history_record(prompt_id).await {
            Ok(Some(record))
                if policy.is_satisfied(record.outputs.len(), record.timings.len(), node_count) =>
            {
                tracing::info!(
                    prompt_id = %prompt_id,
                    attempt,
                    outputs = record.outputs.len(),
                    "Prompt execution finished",
                );
                return Ok(record);
            }
            Ok(_) => {
                tracing::trace!(prompt_id = %prompt_id, attempt, "Prompt not finished yet");
            }
            Err(e @ ComfyUIApiError::MalformedRecord { .. }) => {
                tracing::error!(prompt_id = %prompt_id, attempt, error = %e, "Undecodable history record");
                return Err(PollError::Malformed(e));
            }
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, attempt, error = %e, "History fetch failed");
            }
        }

        if attempt < budget.max_attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    tracing::error!(
        prompt_id = %prompt_id,
        attempts = budget.max_attempts,
        budget_ms = budget.total_wait().as_millis() as u64,
        policy = policy.as_str(),
        "Max retries reached while waiting for image generation",
    );
    Err(PollError::Timeout {
        prompt_id: prompt_id.to_string(),
        attempts: budget.max_attempts,
    })
}
