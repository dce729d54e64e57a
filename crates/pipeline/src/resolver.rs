//! Resolution of a finished prompt's outputs into a deliverable payload.
//!
//! The primary artifact is the image reported in the history outputs. If
//! that file is missing and object storage is configured, the newest
//! `output_video*.webm` / `output_video*.webp` file in the output
//! directory is uploaded instead.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use comfyjob_cloud::store::{content_type_for, ObjectStore};
use comfyjob_comfyui::history::{NodeOutput, OutputFile};
use comfyjob_core::error::JobError;

/// File name prefix of fallback videos written by video-combine nodes.
pub const FALLBACK_VIDEO_PREFIX: &str = "output_video";

/// Fallback extensions and the content type each is uploaded with.
pub const FALLBACK_VIDEO_TYPES: &[(&str, &str)] = &[("webm", "video/webm"), ("webp", "image/webp")];

/// Length of the random object name used for uploads.
const RANDOM_NAME_LEN: usize = 8;

/// How the artifact is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Base64 of the file contents.
    Inline,
    /// Object-storage URL.
    Uploaded,
}

/// A resolved artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// URL or base64 string, depending on `delivery`.
    pub payload: String,
    /// File on disk the payload was produced from.
    pub source: PathBuf,
    pub delivery: Delivery,
}

/// A candidate fallback video found in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackVideo {
    pub path: PathBuf,
    pub extension: &'static str,
    pub content_type: &'static str,
    pub modified: SystemTime,
}

/// Locates and delivers the artifact of a finished prompt.
pub struct OutputResolver {
    output_dir: PathBuf,
    store: Option<Arc<dyn ObjectStore>>,
}

impl OutputResolver {
    /// `store` is `None` when object storage is not configured; artifacts
    /// are then returned inline and the video fallback is skipped.
    pub fn new(output_dir: PathBuf, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { output_dir, store }
    }

    /// Resolve `outputs` into a payload. Single pass, no retries.
    pub async fn resolve(
        &self,
        outputs: &BTreeMap<String, NodeOutput>,
        job_id: &str,
    ) -> Result<Resolved, JobError> {
        let expected = match select_primary_image(outputs) {
            Some(image) => self.output_dir.join(image.relative_path()),
            None => self.output_dir.clone(),
        };

        tracing::info!(path = %expected.display(), "Image generation is done");

        if is_file(&expected).await {
            return self.deliver_primary(&expected, job_id).await;
        }

        match &self.store {
            Some(store) => {
                if let Some(resolved) = self.deliver_fallback(store.as_ref(), job_id).await {
                    return Ok(resolved);
                }
            }
            None => {
                tracing::info!("Object storage not configured, skipping video fallback");
            }
        }

        tracing::error!(path = %expected.display(), "No image or fallback video found");
        Err(JobError::ArtifactNotFound { path: expected })
    }

    /// Upload or inline the primary image.
    async fn deliver_primary(&self, path: &Path, job_id: &str) -> Result<Resolved, JobError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| JobError::Unexpected(format!("failed to read {}: {e}", path.display())))?;

        let (payload, delivery) = match &self.store {
            Some(store) => {
                let file_name = random_file_name(extension_of(path));
                let url = store
                    .put(job_id, &file_name, bytes, content_type_for(path))
                    .await
                    .map_err(|e| JobError::Unexpected(e.to_string()))?;
                tracing::info!(url = %url, "Image generated and uploaded to object storage");
                (url, Delivery::Uploaded)
            }
            None => {
                tracing::info!(size = bytes.len(), "Image generated and converted to base64");
                (STANDARD.encode(&bytes), Delivery::Inline)
            }
        };

        Ok(Resolved {
            payload,
            source: path.to_path_buf(),
            delivery,
        })
    }

    /// Upload the newest fallback video; `None` when there is none or
    /// the upload fails.
    async fn deliver_fallback(&self, store: &dyn ObjectStore, job_id: &str) -> Option<Resolved> {
        let video = match find_fallback_video(&self.output_dir).await {
            Ok(Some(video)) => video,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(dir = %self.output_dir.display(), error = %e, "Failed to scan output directory");
                return None;
            }
        };

        let bytes = match tokio::fs::read(&video.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %video.path.display(), error = %e, "Failed to read fallback video");
                return None;
            }
        };

        let file_name = random_file_name(Some(video.extension));
        match store.put(job_id, &file_name, bytes, video.content_type).await {
            Ok(url) => {
                tracing::info!(url = %url, source = %video.path.display(), "Video generated and uploaded to object storage");
                Some(Resolved {
                    payload: url,
                    source: video.path,
                    delivery: Delivery::Uploaded,
                })
            }
            Err(e) => {
                tracing::warn!(path = %video.path.display(), error = %e, "Failed to upload fallback video");
                None
            }
        }
    }
}

/// Pick the primary image among all node outputs.
///
/// Only saved images are considered when there are any, so previews
/// (`type: "temp"`) are a last resort. Among the candidates the node with
/// the greatest id wins (integer ids compare numerically and sort before
/// non-numeric ids, which compare lexically); within that node the last
/// listed candidate wins.
pub fn select_primary_image(outputs: &BTreeMap<String, NodeOutput>) -> Option<&OutputFile> {
    let any_saved = outputs
        .values()
        .flat_map(|output| &output.images)
        .any(OutputFile::is_saved);

    outputs
        .iter()
        .filter_map(|(node_id, output)| {
            output
                .images
                .iter()
                .filter(|image| !any_saved || image.is_saved())
                .last()
                .map(|image| (node_id, image))
        })
        .max_by(|(a, _), (b, _)| compare_node_ids(a, b))
        .map(|(_, image)| image)
}

fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Find the most recently modified fallback video in `dir`.
///
/// Matches `output_video*.webm` and `output_video*.webp` directly inside
/// `dir`; the newest file across both patterns is returned. Symlinks are
/// followed. Entries that vanish or cannot be stat'ed are skipped.
pub async fn find_fallback_video(dir: &Path) -> std::io::Result<Option<FallbackVideo>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<FallbackVideo> = None;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((extension, content_type)) = fallback_type(name) else {
            continue;
        };

        let path = entry.path();
        let modified = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "No modification time, skipping");
                    continue;
                }
            },
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Cannot stat candidate, skipping");
                continue;
            }
        };

        if newest.as_ref().map_or(true, |current| modified > current.modified) {
            newest = Some(FallbackVideo {
                path,
                extension,
                content_type,
                modified,
            });
        }
    }

    Ok(newest)
}

fn fallback_type(file_name: &str) -> Option<(&'static str, &'static str)> {
    if !file_name.starts_with(FALLBACK_VIDEO_PREFIX) {
        return None;
    }
    let (_, ext) = file_name.rsplit_once('.')?;
    FALLBACK_VIDEO_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .copied()
}

fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn random_file_name(extension: Option<&str>) -> String {
    let mut name = uuid::Uuid::new_v4().simple().to_string();
    name.truncate(RANDOM_NAME_LEN);
    match extension {
        Some(ext) => format!("{name}.{ext}"),
        None => name,
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
