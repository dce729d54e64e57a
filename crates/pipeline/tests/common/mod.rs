//! Shared fixtures for pipeline integration tests: a fake ComfyUI server,
//! an in-memory object store and a fast-polling worker configuration.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use comfyjob_cloud::store::{object_key, ObjectStore, StorageError};
use comfyjob_core::config::{RetryBudget, WorkerConfig};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Fake ComfyUI
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeComfy {
    pub unready_polls: usize,
    pub empty_history_polls: usize,
    pub failing_upload: Option<String>,
    /// Answer `/prompt` with a body lacking `prompt_id`.
    pub omit_prompt_id: bool,
    pub history_record: Value,

    pub health_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub ws_connections: AtomicUsize,
    /// Sockets that saw a close frame or the end of the stream.
    pub ws_closed: AtomicUsize,
    pub uploads: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<Value>>,
}

impl FakeComfy {
    /// A backend whose first history poll already reports `record`.
    pub fn finished_with(record: Value) -> Self {
        Self {
            history_record: record,
            ..Default::default()
        }
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn ws_connections(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    /// Closed sockets, waiting briefly for in-flight closes to land.
    pub async fn settled_ws_closed(&self) -> usize {
        for _ in 0..100 {
            if self.ws_closed.load(Ordering::SeqCst) >= self.ws_connections() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.ws_closed.load(Ordering::SeqCst)
    }

    /// Total number of requests of any kind received so far.
    pub fn total_calls(&self) -> usize {
        self.health_calls()
            + self.history_calls()
            + self.uploads().len()
            + self.submission_count()
            + self.ws_connections.load(Ordering::SeqCst)
    }
}

pub async fn spawn(fake: FakeComfy) -> (String, Arc<FakeComfy>) {
    let state = Arc::new(fake);

    let app = Router::new()
        .route("/", get(health))
        .route("/upload/image", post(upload_image))
        .route("/prompt", post(submit_prompt))
        .route("/history/{prompt_id}", get(history))
        .route("/ws", get(ws_upgrade))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr.to_string(), state)
}

async fn health(State(fake): State<Arc<FakeComfy>>) -> StatusCode {
    let n = fake.health_calls.fetch_add(1, Ordering::SeqCst);
    if n < fake.unready_polls {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn upload_image(State(fake): State<Arc<FakeComfy>>, mut multipart: Multipart) -> Response {
    let mut name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("image") {
            name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await.unwrap();
        }
    }
    fake.uploads.lock().unwrap().push(name.clone());

    if fake.failing_upload.as_deref() == Some(name.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "disk full").into_response();
    }
    Json(json!({ "name": name, "subfolder": "", "type": "input" })).into_response()
}

async fn submit_prompt(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> Json<Value> {
    fake.submissions.lock().unwrap().push(body);
    if fake.omit_prompt_id {
        Json(json!({ "number": 1 }))
    } else {
        Json(json!({ "prompt_id": "abc", "number": 1, "node_errors": {} }))
    }
}

async fn history(
    State(fake): State<Arc<FakeComfy>>,
    UrlPath(prompt_id): UrlPath<String>,
) -> Json<Value> {
    let n = fake.history_calls.fetch_add(1, Ordering::SeqCst);
    let mut body = serde_json::Map::new();
    if n >= fake.empty_history_polls {
        body.insert(prompt_id, fake.history_record.clone());
    }
    Json(Value::Object(body))
}

async fn ws_upgrade(State(fake): State<Arc<FakeComfy>>, ws: WebSocketUpgrade) -> Response {
    fake.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| async move {
        hold_open(socket).await;
        fake.ws_closed.fetch_add(1, Ordering::SeqCst);
    })
}

/// Push `execution_start`, then idle until the client goes away.
async fn hold_open(mut socket: WebSocket) {
    let start = r#"{"type":"execution_start","data":{"prompt_id":"abc"}}"#;
    if socket.send(Message::Text(start.into())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory object store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryStore {
    pub fail: bool,
    pub objects: Mutex<Vec<StoredObject>>,
}

impl MemoryStore {
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        prefix: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = object_key(prefix, file_name);
        if self.fail {
            return Err(StorageError::Upload {
                key,
                message: "bucket unavailable".into(),
            });
        }
        self.objects.lock().unwrap().push(StoredObject {
            key: key.clone(),
            bytes,
            content_type: content_type.to_string(),
        });
        Ok(format!("https://bucket.test/{key}"))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Worker configuration pointing at a fake server with millisecond polling.
pub fn test_config(host: &str, output_dir: &Path) -> WorkerConfig {
    WorkerConfig {
        comfy_host: host.to_string(),
        output_dir: output_dir.to_path_buf(),
        readiness: RetryBudget::new(5, Duration::from_millis(1)),
        completion: RetryBudget::new(5, Duration::from_millis(1)),
        ..WorkerConfig::default()
    }
}

/// [`test_config`] with history polls spaced `interval_ms` apart, long
/// enough for the progress monitor to connect before the job ends.
pub fn paced_config(host: &str, output_dir: &Path, interval_ms: u64) -> WorkerConfig {
    let mut config = test_config(host, output_dir);
    config.completion = RetryBudget::new(config.completion.max_attempts, Duration::from_millis(interval_ms));
    config
}

/// History record whose node `1` saved `filename` in the output root.
pub fn saved_image(filename: &str) -> Value {
    json!({
        "outputs": { "1": { "images": [{ "subfolder": "", "filename": filename, "type": "output" }] } },
        "timings": { "1": { "execution_time": 0.1 } }
    })
}
