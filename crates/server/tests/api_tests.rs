//! End-to-end router tests over the in-memory gateway.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{MultipartBuilder, json_body, post_upload, raw_body, send, test_app};
use depot_core::config::AppConfig;
use depot_storage::ObjectGateway;
use tower::ServiceExt;

/// SHA-256("hello")
const HELLO_HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn hello_form() -> MultipartBuilder {
    MultipartBuilder::new()
        .text("bucket", "b1")
        .file("file", "hello.txt", Some("text/plain"), b"hello")
}

#[tokio::test]
async fn missing_private_key_is_rejected() {
    let app = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/api/v2/upload/files/list?bucket=b1")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Private key is required");
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn wrong_private_key_is_forbidden() {
    let app = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/api/v2/upload/files/list?bucket=b1")
        .header("Private-Key", "not-the-key")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid private key");
    assert_eq!(body["status"], 403);
}

#[tokio::test]
async fn small_upload_defaults_to_digest_name() {
    let app = test_app();
    let response = post_upload(&app, hello_form()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["file_hash"], HELLO_HASH);
    assert_eq!(body["file_path"], format!("{HELLO_HASH}.txt"));
    assert_eq!(body["bucket"], "b1");
    assert_eq!(body["duplicated"], false);
    assert_eq!(body["size"], 5);
    assert_eq!(body["status"], 200);

    // Stored object matches, with the upload metadata attached.
    let meta = app
        .storage
        .head("b1", &format!("{HELLO_HASH}.txt"))
        .await
        .unwrap();
    assert_eq!(meta.size, 5);
    assert_eq!(
        meta.metadata.get("file-hash").map(String::as_str),
        Some(HELLO_HASH)
    );
    assert_eq!(
        meta.metadata.get("original-name").map(String::as_str),
        Some("hello.txt")
    );
}

#[tokio::test]
async fn repeated_upload_is_deduplicated() {
    let app = test_app();

    let first = json_body(post_upload(&app, hello_form()).await).await;
    assert_eq!(first["duplicated"], false);

    let second = json_body(post_upload(&app, hello_form()).await).await;
    assert_eq!(second["duplicated"], true);
    assert_eq!(second["file_path"], first["file_path"]);
    assert_eq!(second["message"], "File already exists (deduplicated)");
}

#[tokio::test]
async fn same_content_at_new_path_is_copied_and_flagged() {
    let app = test_app();

    let first = json_body(
        post_upload(&app, hello_form().text("path", "p1")).await,
    )
    .await;
    assert_eq!(first["duplicated"], false);
    assert_eq!(first["file_path"], format!("p1/{HELLO_HASH}.txt"));

    let second = json_body(
        post_upload(&app, hello_form().text("path", "p2")).await,
    )
    .await;
    assert_eq!(second["duplicated"], true);
    assert_eq!(second["file_path"], format!("p2/{HELLO_HASH}.txt"));

    // Both objects exist with the same bytes.
    for path in [
        format!("p1/{HELLO_HASH}.txt"),
        format!("p2/{HELLO_HASH}.txt"),
    ] {
        let (data, _) = app.storage.get("b1", &path).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }
}

#[tokio::test]
async fn upload_with_original_name_sanitizes_it() {
    let app = test_app();
    let form = MultipartBuilder::new()
        .text("bucket", "b1")
        .text("path", "a/b")
        .text("is_hash", "false")
        .file("file", "My File!.PNG", Some("image/png"), b"png-ish bytes");

    let response = post_upload(&app, form).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["file_path"], "a/b/My_File.PNG");
    assert_eq!(body["duplicated"], false);

    // Folder markers were pre-created for each prefix segment.
    for marker in ["a/", "a/b/"] {
        let meta = app.storage.head("b1", marker).await.unwrap();
        assert_eq!(meta.size, 0);
        assert_eq!(
            meta.content_type.as_deref(),
            Some("application/x-directory")
        );
    }
}

#[tokio::test]
async fn traversal_path_is_rejected_before_any_write() {
    let app = test_app();
    let form = hello_form().text("path", "../etc");

    let response = post_upload(&app, form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains(".."));

    // Nothing landed in storage.
    assert!(app.storage.list("b1", "").await.unwrap().is_empty());
}

#[tokio::test]
async fn upload_without_bucket_is_rejected() {
    let app = test_app();
    let form = MultipartBuilder::new().file("file", "x.txt", Some("text/plain"), b"x");

    let response = post_upload(&app, form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "bucket parameter is required");
}

#[tokio::test]
async fn upload_without_file_is_rejected() {
    let app = test_app();
    let form = MultipartBuilder::new().text("bucket", "b1");

    let response = post_upload(&app, form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "file field is required");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut config = AppConfig::for_testing();
    config.upload.file_max_size = 4;
    let app = common::test_app_with_config(config);

    let response = post_upload(&app, hello_form()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("exceeds"));
}

#[tokio::test]
async fn missing_content_type_is_sniffed() {
    let app = test_app();
    let form = MultipartBuilder::new()
        .text("bucket", "b1")
        .file("file", "notes", None, b"just some plain text");

    let body = json_body(post_upload(&app, form).await).await;
    assert_eq!(body["content_type"], "text/plain; charset=utf-8");
    // No filename extension, so the extension comes from the MIME table.
    assert!(body["file_path"].as_str().unwrap().ends_with(".txt"));
}

#[tokio::test]
async fn get_returns_bytes_with_stored_content_type() {
    let app = test_app();
    let uploaded = json_body(post_upload(&app, hello_form()).await).await;
    let path = uploaded["file_path"].as_str().unwrap();

    let response = send(
        &app,
        "GET",
        &format!("/api/v2/upload/file?bucket=b1&file_path={path}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(raw_body(response).await, b"hello");
}

#[tokio::test]
async fn get_missing_file_is_404_json() {
    let app = test_app();
    let response = send(
        &app,
        "GET",
        "/api/v2/upload/file?bucket=b1&file_path=absent.txt",
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("File not found"));
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn get_without_file_path_is_rejected() {
    let app = test_app();
    let response = send(&app, "GET", "/api/v2/upload/file?bucket=b1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "file_path is required");
}

#[tokio::test]
async fn delete_removes_object_and_index_row() {
    let app = test_app();
    let uploaded = json_body(post_upload(&app, hello_form()).await).await;
    let path = uploaded["file_path"].as_str().unwrap().to_string();

    let response = send(
        &app,
        "DELETE",
        &format!("/api/v2/upload/file?bucket=b1&file_path={path}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["file_path"], path.as_str());
    assert_eq!(body["message"], "File deleted successfully");

    // Object gone, and the index no longer short-circuits: a re-upload is
    // not flagged as duplicated.
    assert!(app.storage.get("b1", &path).await.is_err());
    let re_uploaded = json_body(post_upload(&app, hello_form()).await).await;
    assert_eq!(re_uploaded["duplicated"], false);
}

#[tokio::test]
async fn delete_missing_file_is_404() {
    let app = test_app();
    let response = send(
        &app,
        "DELETE",
        "/api/v2/upload/file?bucket=b1&file_path=absent.txt",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_returns_keys_and_count() {
    let app = test_app();
    post_upload(&app, hello_form().text("path", "docs")).await;
    post_upload(
        &app,
        MultipartBuilder::new()
            .text("bucket", "b1")
            .text("path", "docs")
            .file("file", "other.txt", Some("text/plain"), b"other"),
    )
    .await;

    let response = send(
        &app,
        "GET",
        "/api/v2/upload/files/list?bucket=b1&prefix=docs/",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    // Two files plus the docs/ folder marker.
    assert_eq!(body["count"], 3);
    assert_eq!(body["bucket"], "b1");
    assert_eq!(body["prefix"], "docs/");
    assert!(body["files"].as_array().unwrap().len() == 3);
}
