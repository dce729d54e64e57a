//! Typed view of the events ComfyUI pushes over its WebSocket.
//!
//! Every frame is `{"type": ..., "data": ...}`; [`parse_message`] maps the
//! kinds the progress monitor cares about onto [`ComfyUIMessage`]. Anything
//! else fails to parse and is skipped by the caller.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue depth broadcast; not tied to a prompt.
    Status(StatusData),
    ExecutionStart(PromptRef),
    ExecutionCached(ExecutionCachedData),
    /// `node: None` marks the end of the prompt.
    Executing(ExecutingData),
    /// Sampler step counter.
    Progress(ProgressData),
    Executed(ExecutedData),
    ExecutionSuccess(PromptRef),
    ExecutionInterrupted(InterruptedData),
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
    /// Session id of the receiving socket.
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Nodes skipped because their result was cached.
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100); zero when `max` is not positive.
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0).clamp(0.0, 100.0) as i16
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    /// Node output as ComfyUI reports it; see [`crate::history::NodeOutput`].
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: Option<String>,
    pub exception_message: String,
    pub exception_type: String,
}

impl ComfyUIMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::ExecutionStart(_) => "execution_start",
            Self::ExecutionCached(_) => "execution_cached",
            Self::Executing(_) => "executing",
            Self::Progress(_) => "progress",
            Self::Executed(_) => "executed",
            Self::ExecutionSuccess(_) => "execution_success",
            Self::ExecutionInterrupted(_) => "execution_interrupted",
            Self::ExecutionError(_) => "execution_error",
        }
    }

    /// Prompt the message refers to, if it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Status(_) => None,
            Self::Progress(data) => data.prompt_id.as_deref(),
            Self::ExecutionStart(data) | Self::ExecutionSuccess(data) => Some(&data.prompt_id),
            Self::ExecutionCached(data) => Some(&data.prompt_id),
            Self::Executing(data) => Some(&data.prompt_id),
            Self::Executed(data) => Some(&data.prompt_id),
            Self::ExecutionInterrupted(data) => Some(&data.prompt_id),
            Self::ExecutionError(data) => Some(&data.prompt_id),
        }
    }
}

/// Decode one text frame. Unknown kinds (custom-node broadcasts) are errors.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
