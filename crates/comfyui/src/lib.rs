//! ComfyUI REST and WebSocket client library.
//!
//! Provides the HTTP API wrapper used to upload inputs, queue workflows
//! and read history, the readiness prober and completion poller built on
//! it, typed WebSocket message parsing, and the progress monitor that
//! logs live execution events while a job runs.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod poller;
pub mod readiness;
