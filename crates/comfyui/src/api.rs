//! HTTP side of a ComfyUI instance: input uploads, `/prompt` and
//! `/history`. Readiness probing lives in [`crate::readiness`].

use std::collections::HashMap;

use serde::Deserialize;

use crate::history::HistoryRecord;

/// `reqwest` wrapper bound to one ComfyUI base URL. Cheap to clone.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`. A body without `prompt_id` does
/// not decode and surfaces as [`ComfyUIApiError::Request`].
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub prompt_id: String,
    /// Queue position.
    #[serde(default)]
    pub number: Option<i64>,
    /// Validation problems ComfyUI tolerated when queuing.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure or undecodable body.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx answer; `body` is kept verbatim for the job error details.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// A history record exists but does not have the expected shape.
    #[error("malformed history record for prompt {prompt_id}: {source}")]
    MalformedRecord {
        prompt_id: String,
        source: serde_json::Error,
    },
}

impl ComfyUIApi {
    /// `api_url` has no trailing slash, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// `POST /upload/image` as multipart (`image` file part plus
    /// `overwrite=true`); a re-run job replaces its earlier inputs.
    pub async fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<(), ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Queue `workflow` via `POST /prompt`.
    ///
    /// ComfyUI sends this prompt's WebSocket events only to the socket
    /// that connected with `client_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /history/{prompt_id}`; `{}` while the prompt is still running.
    pub async fn get_history(&self, prompt_id: &str) -> Result<HashMap<String, serde_json::Value>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// The record for `prompt_id`, or `None` until ComfyUI has one.
    pub async fn get_history_record(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryRecord>, ComfyUIApiError> {
        let Some(raw) = self.get_history(prompt_id).await?.remove(prompt_id) else {
            return Ok(None);
        };
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|source| ComfyUIApiError::MalformedRecord {
                prompt_id: prompt_id.to_string(),
                source,
            })
    }

    // ---- response handling ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.text().await {
            Ok(text) => text.trim().to_string(),
            Err(_) => "<unreadable body>".to_string(),
        };
        Err(ComfyUIApiError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        Ok(Self::ensure_success(response).await?.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await.map(drop)
    }
}
