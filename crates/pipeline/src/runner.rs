//! Job orchestration.
//!
//! [`JobRunner::handle`] is the single entry point for the ingestion
//! layer. It runs validate -> readiness -> upload -> submit -> poll ->
//! resolve, stopping at the first failure, and always returns a
//! [`JobResponse`].

use std::sync::Arc;

use comfyjob_cloud::store::ObjectStore;
use comfyjob_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use comfyjob_comfyui::client::ComfyUIClient;
use comfyjob_comfyui::monitor::MonitorHandle;
use comfyjob_comfyui::poller::{poll_completion, PollError};
use comfyjob_core::config::WorkerConfig;
use comfyjob_core::error::JobError;
use comfyjob_core::input::{Job, JobInput};
use comfyjob_core::response::JobResponse;

use crate::assets::upload_images;
use crate::report::build_report;
use crate::resolver::OutputResolver;

/// Runs jobs against one ComfyUI instance.
///
/// Holds no per-job state; one runner can serve any number of jobs.
pub struct JobRunner {
    config: WorkerConfig,
    api: ComfyUIApi,
    ws_client: ComfyUIClient,
    resolver: OutputResolver,
}

impl JobRunner {
    /// `store` must be `Some` exactly when object storage is configured.
    pub fn new(config: WorkerConfig, store: Option<Arc<dyn ObjectStore>>) -> Self {
        let api = ComfyUIApi::new(config.api_url());
        let ws_client = ComfyUIClient::new(config.ws_url());
        let resolver = OutputResolver::new(config.output_dir.clone(), store);
        Self {
            config,
            api,
            ws_client,
            resolver,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one job end to end.
    pub async fn handle(&self, job: &Job) -> JobResponse {
        let refresh_worker = self.config.refresh_worker;

        match self.run(job).await {
            Ok(payload) => {
                tracing::info!(job_id = %job.id, "Job completed");
                JobResponse::Success {
                    message: payload,
                    refresh_worker,
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job failed");
                e.into_response(refresh_worker)
            }
        }
    }

    async fn run(&self, job: &Job) -> Result<String, JobError> {
        let input = JobInput::validate(job.input.as_ref())?;

        if !self.api.wait_until_ready(&self.config.readiness).await {
            return Err(JobError::BackendUnreachable);
        }

        upload_images(&self.api, &input.images).await?;

        let client_id = ComfyUIClient::new_client_id();
        let prompt_id = self.submit(&input, &client_id).await?;

        let monitor = self.config.progress_monitor.then(|| {
            MonitorHandle::start(
                self.ws_client.clone(),
                client_id,
                prompt_id.clone(),
                self.config.detailed_logging,
            )
        });

        let result = self.complete(&input, &prompt_id, &job.id).await;

        if let Some(monitor) = monitor {
            monitor.stop();
            monitor.join().await;
        }

        result
    }

    /// Queue the workflow and return its prompt id.
    async fn submit(&self, input: &JobInput, client_id: &str) -> Result<String, JobError> {
        let response = self
            .api
            .submit_workflow(&input.workflow, client_id)
            .await
            .map_err(|e| match e {
                ComfyUIApiError::ApiError { status, body } => {
                    JobError::SubmissionFailure(format!("HTTP {status}: {body}"))
                }
                other => JobError::SubmissionFailure(other.to_string()),
            })?;

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_number = ?response.number,
            "Queued workflow",
        );
        if response.node_errors.as_object().is_some_and(|errors| !errors.is_empty()) {
            tracing::warn!(
                prompt_id = %response.prompt_id,
                node_errors = %response.node_errors,
                "ComfyUI queued the workflow with node errors",
            );
        }
        Ok(response.prompt_id)
    }

    /// Wait for the prompt to finish and resolve its artifact.
    async fn complete(&self, input: &JobInput, prompt_id: &str, job_id: &str) -> Result<String, JobError> {
        let record = poll_completion(
            &self.api,
            prompt_id,
            &self.config.completion,
            self.config.completion_policy,
            input.node_count(),
        )
        .await
        .map_err(|e| match e {
            PollError::Timeout { .. } => JobError::PollTimeout,
            PollError::Malformed(e) => JobError::MalformedHistory(e.to_string()),
        })?;

        if self.config.detailed_logging {
            build_report(&input.workflow, &record).log(prompt_id);
        }

        if record.outputs.is_empty() {
            return Err(JobError::NoOutputs);
        }

        let resolved = self.resolver.resolve(&record.outputs, job_id).await?;
        tracing::debug!(
            source = %resolved.source.display(),
            delivery = ?resolved.delivery,
            "Artifact resolved",
        );
        Ok(resolved.payload)
    }
}
