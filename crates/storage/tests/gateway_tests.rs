//! Gateway contract tests over the in-memory backend.

use bytes::Bytes;
use depot_storage::{MemoryGateway, Metadata, ObjectGateway, StorageError, bytes_stream};
use futures::StreamExt;

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn put_get_round_trip_preserves_content_type() {
    let gateway = MemoryGateway::new();
    gateway
        .put_bytes(
            "b1",
            "dir/hello.txt",
            Bytes::from_static(b"hello"),
            "text/plain",
            &Metadata::new(),
        )
        .await
        .unwrap();

    let (data, content_type) = gateway.get("b1", "dir/hello.txt").await.unwrap();
    assert_eq!(&data[..], b"hello");
    assert_eq!(content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn get_missing_object_is_not_found() {
    let gateway = MemoryGateway::new();
    match gateway.get("b1", "missing").await {
        Err(StorageError::NotFound(key)) => assert_eq!(key, "missing"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn head_reports_size_and_lowercased_metadata() {
    let gateway = MemoryGateway::new();
    gateway
        .put_bytes(
            "b1",
            "a.bin",
            Bytes::from_static(b"12345"),
            "application/octet-stream",
            &metadata(&[("Original-Name", "a.bin"), ("file-hash", "ff")]),
        )
        .await
        .unwrap();

    let meta = gateway.head("b1", "a.bin").await.unwrap();
    assert_eq!(meta.size, 5);
    assert_eq!(meta.metadata.get("original-name").map(String::as_str), Some("a.bin"));
    assert!(!meta.metadata.contains_key("Original-Name"));
}

#[tokio::test]
async fn list_is_lexicographic_and_prefix_scoped() {
    let gateway = MemoryGateway::new();
    for key in ["p/chunk_00002.part", "p/chunk_00000.part", "p/chunk_00001.part", "q/other"] {
        gateway
            .put_bytes("b1", key, Bytes::from_static(b"x"), "", &Metadata::new())
            .await
            .unwrap();
    }

    let keys = gateway.list("b1", "p/").await.unwrap();
    assert_eq!(
        keys,
        vec!["p/chunk_00000.part", "p/chunk_00001.part", "p/chunk_00002.part"]
    );

    // Buckets are isolated.
    assert!(gateway.list("b2", "").await.unwrap().is_empty());
}

#[tokio::test]
async fn copy_duplicates_across_buckets() {
    let gateway = MemoryGateway::new();
    gateway
        .put_bytes("src", "k", Bytes::from_static(b"payload"), "text/plain", &Metadata::new())
        .await
        .unwrap();

    gateway.copy("src", "k", "dst", "moved/k").await.unwrap();

    let (data, _) = gateway.get("dst", "moved/k").await.unwrap();
    assert_eq!(&data[..], b"payload");
    // Source is untouched.
    assert!(gateway.get("src", "k").await.is_ok());
}

#[tokio::test]
async fn folder_marker_is_zero_byte_directory_and_idempotent() {
    let gateway = MemoryGateway::new();
    gateway.create_folder_marker("b1", "a/b").await.unwrap();
    gateway.create_folder_marker("b1", "a/b").await.unwrap();
    gateway.create_folder_marker("b1", "a/b/").await.unwrap();

    let meta = gateway.head("b1", "a/b/").await.unwrap();
    assert_eq!(meta.size, 0);
    assert_eq!(meta.content_type.as_deref(), Some("application/x-directory"));

    let keys = gateway.list("b1", "a/").await.unwrap();
    assert_eq!(keys, vec!["a/b/"]);
}

#[tokio::test]
async fn put_stream_and_get_stream_round_trip() {
    let gateway = MemoryGateway::new();
    let body = Bytes::from_static(b"streaming body with several frames");

    let written = gateway
        .put_stream(
            "b1",
            "s.bin",
            bytes_stream(body.clone()),
            body.len() as u64,
            "application/octet-stream",
            &Metadata::new(),
        )
        .await
        .unwrap();
    assert_eq!(written, body.len() as u64);

    let (mut stream, size) = gateway.get_stream("b1", "s.bin").await.unwrap();
    assert_eq!(size, body.len() as u64);

    let mut collected = Vec::new();
    while let Some(frame) = stream.next().await {
        collected.extend_from_slice(&frame.unwrap());
    }
    assert_eq!(collected, body);
}

#[tokio::test]
async fn delete_removes_and_then_reports_not_found() {
    let gateway = MemoryGateway::new();
    gateway
        .put_bytes("b1", "k", Bytes::from_static(b"x"), "", &Metadata::new())
        .await
        .unwrap();

    gateway.delete("b1", "k").await.unwrap();
    assert!(matches!(
        gateway.delete("b1", "k").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn poisoned_key_fails_mid_stream() {
    let gateway = MemoryGateway::new();
    gateway
        .put_bytes("b1", "bad", Bytes::from_static(b"0123456789abcdef"), "", &Metadata::new())
        .await
        .unwrap();
    gateway.poison_key("b1", "bad").await;

    let (mut stream, _) = gateway.get_stream("b1", "bad").await.unwrap();
    let mut saw_error = false;
    while let Some(frame) = stream.next().await {
        if frame.is_err() {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error, "poisoned stream should yield an error");
}
