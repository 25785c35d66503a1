//! Shared test fixtures for router tests.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use depot_core::config::AppConfig;
use depot_server::{AppState, create_router};
use depot_storage::MemoryGateway;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// The private key baked into `AppConfig::for_testing()`.
pub const TEST_KEY: &str = "test-private-key";

#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub storage: Arc<MemoryGateway>,
}

/// Build a router over a fresh in-memory gateway.
#[allow(dead_code)]
pub fn test_app() -> TestApp {
    test_app_with_config(AppConfig::for_testing())
}

#[allow(dead_code)]
pub fn test_app_with_config(config: AppConfig) -> TestApp {
    let storage = MemoryGateway::new();
    let state = AppState::new(config, storage.clone());
    TestApp {
        router: create_router(state),
        storage,
    }
}

/// Builds multipart/form-data bodies byte by byte.
#[allow(dead_code)]
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartBuilder {
    pub fn new() -> Self {
        Self {
            boundary: "depot-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(
        mut self,
        name: &str,
        filename: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        if let Some(content_type) = content_type {
            self.body
                .extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Returns the Content-Type header value and the finished body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

/// POST an upload form, authenticated.
#[allow(dead_code)]
pub async fn post_upload(app: &TestApp, form: MultipartBuilder) -> Response<Body> {
    let (content_type, body) = form.finish();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v2/upload/file")
        .header("Private-Key", TEST_KEY)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// Send an authenticated request without a body.
#[allow(dead_code)]
pub async fn send(app: &TestApp, method: &str, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Private-Key", TEST_KEY)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

/// Collect a response body as JSON.
#[allow(dead_code)]
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body as raw bytes.
#[allow(dead_code)]
pub async fn raw_body(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
