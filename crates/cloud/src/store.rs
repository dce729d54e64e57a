use std::path::Path;

use async_trait::async_trait;

/// Destination for generated artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` as `<prefix>/<file_name>` and return a URL the
    /// caller can download it from.
    async fn put(
        &self,
        prefix: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Errors from the object storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Failed to upload {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Failed to presign {key}: {message}")]
    Presign { key: String, message: String },
}

/// Object key for a file stored under a job prefix.
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// MIME type for the artifact extensions ComfyUI produces.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
