//! Live progress monitor for a running prompt.
//!
//! [`MonitorHandle::start`] spawns a task that connects to the ComfyUI
//! WebSocket endpoint and logs every message it receives until told to
//! stop. The monitor is observability only: it never feeds anything back
//! into the job and its failures are logged, never propagated.
//!
//! Shutdown is cooperative. Call [`MonitorHandle::stop`] followed by
//! [`MonitorHandle::join`]; dropping the handle without joining still
//! cancels the task so the socket is not leaked.

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIClient;
use crate::messages::{parse_message, ComfyUIMessage};

/// Upper bound on waiting for the monitor task after `stop`.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running monitor task.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<u64>>,
}

impl MonitorHandle {
    /// Spawn the monitor for `prompt_id`, connecting as `client_id`.
    ///
    /// With `verbose` unset only lifecycle messages (start, success,
    /// interruption, error) are logged at `info`; per-node and progress
    /// chatter goes to `trace`.
    pub fn start(client: ComfyUIClient, client_id: String, prompt_id: String, verbose: bool) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            tracing::debug!(prompt_id = %prompt_id, "Progress monitor starting");
            let received = run_monitor(&client, &client_id, &prompt_id, verbose, &task_cancel).await;
            tracing::debug!(prompt_id = %prompt_id, received, "Progress monitor exited");
            received
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Signal the task to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the task has already terminated.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the task to terminate, up to [`JOIN_TIMEOUT`].
    ///
    /// Returns the number of messages received, or `None` if the task
    /// panicked or had to be aborted. Call [`stop`](Self::stop) first;
    /// otherwise this waits for the connection to end on its own.
    pub async fn join(mut self) -> Option<u64> {
        let mut task = self.task.take()?;
        match tokio::time::timeout(JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(received)) => Some(received),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Progress monitor task failed");
                None
            }
            Err(_) => {
                tracing::warn!("Progress monitor did not stop in time, aborting");
                task.abort();
                None
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect and log messages until cancelled or the connection ends.
async fn run_monitor(
    client: &ComfyUIClient,
    client_id: &str,
    prompt_id: &str,
    verbose: bool,
    cancel: &CancellationToken,
) -> u64 {
    let conn = tokio::select! {
        _ = cancel.cancelled() => return 0,
        result = client.connect(client_id) => match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Progress monitor could not connect");
                return 0;
            }
        },
    };

    tracing::debug!(prompt_id = %prompt_id, client_id = %conn.client_id, "Progress monitor connected");
    let mut ws_stream = conn.ws_stream;
    let mut received = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = ws_stream.close(None).await {
                    tracing::debug!(error = %e, "Error closing monitor WebSocket");
                }
                break;
            }
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    received += 1;
                    log_message(&text, prompt_id, verbose);
                }
                Some(Ok(Message::Binary(_))) => {
                    // Preview images.
                    received += 1;
                    tracing::trace!(prompt_id = %prompt_id, "Ignoring binary message (preview image)");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(prompt_id = %prompt_id, ?frame, "ComfyUI WebSocket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(prompt_id = %prompt_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },
        }
    }

    received
}

/// Log one text frame.
fn log_message(text: &str, prompt_id: &str, verbose: bool) {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Unrecognized ComfyUI message");
            return;
        }
    };

    if msg.prompt_id().is_some_and(|id| id != prompt_id) {
        tracing::trace!(kind = msg.kind(), "Message for another prompt");
        return;
    }

    if !verbose && !is_lifecycle(&msg) {
        tracing::trace!(prompt_id = %prompt_id, kind = msg.kind(), "ComfyUI message");
        return;
    }

    match msg {
        ComfyUIMessage::Status(data) => {
            tracing::info!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
        }
        ComfyUIMessage::ExecutionStart(_) => {
            tracing::info!(prompt_id = %prompt_id, "Execution started");
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::info!(prompt_id = %prompt_id, nodes = ?data.nodes, "Execution used cache");
        }
        ComfyUIMessage::Executing(data) => match data.node {
            Some(node) => tracing::info!(prompt_id = %prompt_id, node = %node, "Executing node"),
            None => tracing::info!(prompt_id = %prompt_id, "Execution completed (all nodes done)"),
        },
        ComfyUIMessage::Progress(data) => {
            tracing::info!(
                prompt_id = %prompt_id,
                node = ?data.node,
                value = data.value,
                max = data.max,
                percent = data.percent(),
                "Generation progress",
            );
        }
        ComfyUIMessage::Executed(data) => {
            tracing::info!(prompt_id = %prompt_id, node = %data.node, "Node executed with output");
        }
        ComfyUIMessage::ExecutionSuccess(_) => {
            tracing::info!(prompt_id = %prompt_id, "Execution succeeded");
        }
        ComfyUIMessage::ExecutionInterrupted(data) => {
            tracing::warn!(
                prompt_id = %prompt_id,
                node_id = ?data.node_id,
                node_type = ?data.node_type,
                "Execution interrupted",
            );
        }
        ComfyUIMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id = %prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
        }
    }
}

fn is_lifecycle(msg: &ComfyUIMessage) -> bool {
    matches!(
        msg,
        ComfyUIMessage::ExecutionStart(_)
            | ComfyUIMessage::ExecutionSuccess(_)
            | ComfyUIMessage::ExecutionInterrupted(_)
            | ComfyUIMessage::ExecutionError(_)
    )
}
