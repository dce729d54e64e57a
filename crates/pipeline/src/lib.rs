//! End-to-end job pipeline for the ComfyUI worker.
//!
//! [`runner::JobRunner`] validates a job, waits for ComfyUI, uploads
//! input images, queues the workflow, polls for completion while the
//! progress monitor logs live events, and resolves the produced artifact
//! into a base64 payload or an object-storage URL.

pub mod assets;
pub mod report;
pub mod resolver;
pub mod runner;
