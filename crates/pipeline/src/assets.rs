//! Upload of job input images into the ComfyUI input directory.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use comfyjob_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use comfyjob_core::error::JobError;
use comfyjob_core::input::ImageInput;

/// Upload every image, then report.
///
/// A failing image does not stop the remaining uploads; all failures are
/// collected into a single [`JobError::UploadFailure`]. Returns one
/// confirmation line per uploaded image on success.
pub async fn upload_images(api: &ComfyUIApi, images: &[ImageInput]) -> Result<Vec<String>, JobError> {
    if images.is_empty() {
        tracing::debug!("No images to upload");
        return Ok(Vec::new());
    }

    tracing::info!(count = images.len(), "Uploading input images");

    let mut uploaded = Vec::with_capacity(images.len());
    let mut errors = Vec::new();

    for image in images {
        match upload_one(api, image).await {
            Ok(()) => uploaded.push(format!("Successfully uploaded {}", image.name)),
            Err(detail) => {
                tracing::warn!(name = %image.name, error = %detail, "Image upload failed");
                errors.push(detail);
            }
        }
    }

    if !errors.is_empty() {
        tracing::error!(failed = errors.len(), total = images.len(), "Image upload finished with errors");
        return Err(JobError::UploadFailure { details: errors });
    }

    tracing::info!(count = uploaded.len(), "Image upload complete");
    Ok(uploaded)
}

/// Decode and upload one image, returning a human-readable failure line.
async fn upload_one(api: &ComfyUIApi, image: &ImageInput) -> Result<(), String> {
    let bytes = STANDARD
        .decode(image.image.trim())
        .map_err(|e| format!("Error decoding {}: {e}", image.name))?;

    api.upload_image(&image.name, bytes)
        .await
        .map_err(|e| match e {
            ComfyUIApiError::ApiError { body, .. } => format!("Error uploading {}: {body}", image.name),
            other => format!("Error uploading {}: {other}", image.name),
        })
}
