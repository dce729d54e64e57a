//! Result documents returned to the job caller.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Final outcome of a job, serialized into one of three shapes:
///
/// - `{"status": "success", "message": ..., "refresh_worker": ...}`
/// - `{"status": "error", "message": ..., "details": [...], "refresh_worker": ...}`
/// - `{"error": ..., "refresh_worker": ...}` for validation and pre-flight
///   failures.
///
/// `details` is omitted when empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResponse {
    /// `message` is either an object-storage URL or base64 file contents.
    Success {
        message: String,
        refresh_worker: bool,
    },
    Error {
        message: String,
        details: Vec<String>,
        refresh_worker: bool,
    },
    Rejected {
        error: String,
        refresh_worker: bool,
    },
}

impl JobResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn refresh_worker(&self) -> bool {
        match self {
            Self::Success { refresh_worker, .. }
            | Self::Error { refresh_worker, .. }
            | Self::Rejected { refresh_worker, .. } => *refresh_worker,
        }
    }
}

impl Serialize for JobResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success {
                message,
                refresh_worker,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("status", "success")?;
                map.serialize_entry("message", message)?;
                map.serialize_entry("refresh_worker", refresh_worker)?;
                map.end()
            }
            Self::Error {
                message,
                details,
                refresh_worker,
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("status", "error")?;
                map.serialize_entry("message", message)?;
                if !details.is_empty() {
                    map.serialize_entry("details", details)?;
                }
                map.serialize_entry("refresh_worker", refresh_worker)?;
                map.end()
            }
            Self::Rejected {
                error,
                refresh_worker,
            } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("refresh_worker", refresh_worker)?;
                map.end()
            }
        }
    }
}
