//! Stub RackHD API shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;

pub const FAKE_RESPONSE: &str = "{\"fakeResponse\":\"fake rackhd response\"}\n";

#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub content_length: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    requests: Arc<Mutex<Vec<Captured>>>,
}

pub struct StubRackHd {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Captured>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for StubRackHd {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl StubRackHd {
    /// Answer every request with `status` and [`FAKE_RESPONSE`].
    pub async fn start(status: StatusCode) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            status,
            requests: Arc::clone(&requests),
        };
        let app = Router::new().fallback(capture).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .expect("Stub server failed");
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().expect("stub state poisoned").clone()
    }
}

async fn capture(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state
        .requests
        .lock()
        .expect("stub state poisoned")
        .push(Captured {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            content_type: header_value(header::CONTENT_TYPE),
            accept: header_value(header::ACCEPT),
            content_length: header_value(header::CONTENT_LENGTH),
            body: body.to_vec(),
        });
    (state.status, FAKE_RESPONSE)
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timeout waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
