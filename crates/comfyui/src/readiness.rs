//! Readiness probing for a ComfyUI instance that may still be starting.

use comfyjob_core::config::RetryBudget;

use crate::api::ComfyUIApi;

/// Poll `url` with `GET` until it answers with a success status.
///
/// Transport errors and non-success statuses count as a failed attempt.
/// Sleeps `budget.interval` between attempts (not after the last one) and
/// returns `false` once `budget.max_attempts` requests have failed.
pub async fn probe(client: &reqwest::Client, url: &str, budget: &RetryBudget) -> bool {
    for attempt in 1..=budget.max_attempts {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(url = %url, attempt, "ComfyUI API is reachable");
                return true;
            }
            Ok(response) => {
                tracing::trace!(url = %url, attempt, status = response.status().as_u16(), "ComfyUI not ready");
            }
            Err(e) => {
                tracing::trace!(url = %url, attempt, error = %e, "ComfyUI not reachable yet");
            }
        }

        if attempt < budget.max_attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    tracing::warn!(
        url = %url,
        attempts = budget.max_attempts,
        budget_ms = budget.total_wait().as_millis() as u64,
        "Failed to connect to ComfyUI after exhausting the readiness budget",
    );
    false
}

impl ComfyUIApi {
    /// Probe the instance's base URL until it is ready.
    pub async fn wait_until_ready(&self, budget: &RetryBudget) -> bool {
        probe(self.http(), self.api_url(), budget).await
    }
}
