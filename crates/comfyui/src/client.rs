//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket base URL of one ComfyUI
//! instance. Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] that receives the events addressed to a client id.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used for ComfyUI connections.
pub type ComfyUIStream =
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client id sent during the handshake; ComfyUI routes the progress
    /// of prompts queued with the same id to this connection.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    /// WebSocket base URL (e.g. `ws://127.0.0.1:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Generate a fresh client id for a submission/monitor pair.
    pub fn new_client_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Connect to the ComfyUI `/ws` endpoint as `client_id`.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(ComfyUIClient::new_client_id(), ComfyUIClient::new_client_id());
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let client = ComfyUIClient::new("ws://127.0.0.1:9".into());
        let result = client.connect("test").await;
        assert!(matches!(result, Err(ComfyUIClientError::Connection(_))));
    }
}
