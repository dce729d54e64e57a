//! In-process fake ComfyUI server for integration tests.
//!
//! Serves the subset of the ComfyUI HTTP/WebSocket API the worker uses on
//! an ephemeral port and counts every call so tests can assert exact
//! attempt numbers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Behaviour knobs and call counters of the fake server.
#[derive(Default)]
pub struct FakeComfy {
    /// Health checks answered with 503 before the first 200.
    pub unready_polls: usize,
    /// History polls answered with `{}` before the record is returned.
    pub empty_history_polls: usize,
    /// Upload of this file name fails with 500.
    pub failing_upload: Option<String>,
    /// Record returned for any prompt once the empty polls are used up.
    pub history_record: Value,
    /// Text frames pushed to every WebSocket client on connect.
    pub ws_messages: Vec<String>,

    pub health_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    pub submissions: Mutex<Vec<Value>>,
}

impl FakeComfy {
    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Start the fake server and return its `host:port`.
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
    let mut file_name = None;
    let mut bytes = Vec::new();
    let mut overwrite = None;

    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name() {
            Some("image") => {
                file_name = field.file_name().map(str::to_string);
                bytes = field.bytes().await.unwrap().to_vec();
            }
            Some("overwrite") => overwrite = Some(field.text().await.unwrap()),
            _ => {}
        }
    }

    let name = file_name.unwrap_or_default();
    fake.uploads.lock().unwrap().push((name.clone(), bytes));

    if overwrite.as_deref() != Some("true") {
        return (StatusCode::BAD_REQUEST, "overwrite flag missing").into_response();
    }
    if fake.failing_upload.as_deref() == Some(name.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "disk full").into_response();
    }
    Json(json!({ "name": name, "subfolder": "", "type": "input" })).into_response()
}

async fn submit_prompt(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> Json<Value> {
    fake.submissions.lock().unwrap().push(body);
    Json(json!({ "prompt_id": "abc", "number": 1, "node_errors": {} }))
}

async fn history(
    State(fake): State<Arc<FakeComfy>>,
    Path(prompt_id): Path<String>,
) -> Json<Value> {
    let n = fake.history_calls.fetch_add(1, Ordering::SeqCst);
    if n < fake.empty_history_polls {
        Json(json!({}))
    } else {
        let mut body = serde_json::Map::new();
        body.insert(prompt_id, fake.history_record.clone());
        Json(Value::Object(body))
    }
}

async fn ws_upgrade(State(fake): State<Arc<FakeComfy>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| push_messages(socket, fake))
}

async fn push_messages(mut socket: WebSocket, fake: Arc<FakeComfy>) {
    for text in &fake.ws_messages {
        if socket.send(Message::Text(text.clone().into())).await.is_err() {
            return;
        }
    }
    // Keep the connection open until the client goes away.
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
