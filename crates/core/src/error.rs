use std::path::PathBuf;

use crate::input::InputError;
use crate::response::JobResponse;

/// Terminal failure of a single job.
///
/// Transient conditions (network blips while probing or polling) never
/// appear here; they are absorbed by the retry loops and only surface as
/// [`JobError::BackendUnreachable`] or [`JobError::PollTimeout`] once the
/// budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error("ComfyUI API is not reachable")]
    BackendUnreachable,

    #[error("Some images failed to upload")]
    UploadFailure { details: Vec<String> },

    #[error("Error queuing workflow: {0}")]
    SubmissionFailure(String),

    #[error("Max retries reached while waiting for image generation")]
    PollTimeout,

    /// ComfyUI answered with a history record that cannot be read.
    #[error("Invalid history record: {0}")]
    MalformedHistory(String),

    #[error("No outputs found for prompt")]
    NoOutputs,

    #[error("the image does not exist in the specified output folder: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("Unhandled error while finalizing result: {0}")]
    Unexpected(String),
}

impl JobError {
    /// Convert the error into the document returned to the caller.
    ///
    /// Upload and artifact failures use the `status`/`message` shape;
    /// every other failure is reported through the shallower `error`
    /// shape.
    pub fn into_response(self, refresh_worker: bool) -> JobResponse {
        match self {
            Self::UploadFailure { ref details } => JobResponse::Error {
                message: self.to_string(),
                details: details.clone(),
                refresh_worker,
            },
            Self::ArtifactNotFound { .. } => JobResponse::Error {
                message: self.to_string(),
                details: Vec::new(),
                refresh_worker,
            },
            other => JobResponse::Rejected {
                error: other.to_string(),
                refresh_worker,
            },
        }
    }
}
