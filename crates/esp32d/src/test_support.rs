//! In-process stand-in for the ESP32 firmware's HTTP server.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Query;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;

/// Scriptable fake device. Every request is recorded as `"METHOD /path?query"`.
pub struct FakeDevice {
    pub mode: AtomicU8,
    pub fail_commands: AtomicBool,
    pub malformed_status: AtomicBool,
    pub omit_mode: AtomicBool,
    pub stall_temp: AtomicBool,
    requests: Mutex<Vec<String>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
    uploads: Mutex<Vec<Vec<u8>>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(1),
            fail_commands: AtomicBool::new(false),
            malformed_status: AtomicBool::new(false),
            omit_mode: AtomicBool::new(false),
            stall_temp: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Serve the device on an ephemeral port and return its `host:port`.
    pub async fn serve(device: Arc<FakeDevice>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(handle).with_state(device);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Decoded value of `key` in the most recent request's query string
    pub fn last_query(&self, key: &str) -> Option<String> {
        self.queries
            .lock()
            .unwrap()
            .last()
            .and_then(|query| query.get(key).cloned())
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().unwrap().clone()
    }

    fn status(&self) -> serde_json::Value {
        json!({
            "mode": "solid",
            "power": "ON",
            "brightness": 60,
            "color": {"r": 255, "g": 80, "b": 0},
            "speed": 40,
            "matrix": {"w": 64, "h": 8},
            "text": "HELLO",
            "scrolling": "ON",
            "heap_free": 120000
        })
    }
}

async fn handle(
    State(device): State<Arc<FakeDevice>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    device
        .requests
        .lock()
        .unwrap()
        .push(format!("{} {}", method, uri));
    device.queries.lock().unwrap().push(query);

    let failing = device.fail_commands.load(Ordering::SeqCst);
    let path = uri.path();

    match (method, path) {
        (Method::GET, "/api/mode") => {
            if device.omit_mode.load(Ordering::SeqCst) {
                Json(json!({"status": "ok"})).into_response()
            } else {
                Json(json!({"mode": device.mode.load(Ordering::SeqCst)})).into_response()
            }
        }
        (Method::GET, "/api/status") => {
            if device.malformed_status.load(Ordering::SeqCst) {
                (StatusCode::OK, "<html>not json</html>").into_response()
            } else {
                Json(device.status()).into_response()
            }
        }
        (Method::GET, "/api/temp") => {
            if device.stall_temp.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Json(json!({"temp": 42.5})).into_response()
        }
        (_, _) if failing => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        (Method::POST, "/api/update") => {
            device.uploads.lock().unwrap().push(body.to_vec());
            Json(json!({"status": "ok", "message": "rebooting"})).into_response()
        }
        (Method::GET, "/api/reboot") => StatusCode::OK.into_response(),
        (Method::GET, p) if p.starts_with("/api/mode/set") && p.len() > "/api/mode/set".len() => {
            match p["/api/mode/set".len()..].parse::<u8>() {
                Ok(mode) => {
                    device.mode.store(mode, Ordering::SeqCst);
                    StatusCode::OK.into_response()
                }
                Err(_) => StatusCode::NOT_FOUND.into_response(),
            }
        }
        (Method::GET, p) if p.starts_with("/api/") && p.ends_with("/set") => {
            Json(device.status()).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
