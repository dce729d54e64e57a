//! Shared domain types for the ComfyUI job worker.
//!
//! Holds the process configuration, the job error taxonomy, input
//! validation and the result documents handed back to the caller. This
//! crate performs no I/O.

pub mod config;
pub mod error;
pub mod input;
pub mod response;
