//! In-memory gateway for tests.
//!
//! Implements the full `ObjectGateway` contract over a `HashMap`, with
//! lexicographic listing to match S3 semantics, plus failure injection
//! knobs used by compose and upload tests.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, Metadata, ObjectGateway, ObjectMeta, normalize_metadata};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: Metadata,
    last_modified: time::OffsetDateTime,
}

#[derive(Default)]
struct State {
    buckets: HashSet<String>,
    /// Keyed by (bucket, key); BTreeMap gives lexicographic listings.
    objects: BTreeMap<(String, String), StoredObject>,
    /// Keys whose reads fail mid-stream.
    poisoned: HashSet<(String, String)>,
}

/// In-memory object gateway.
#[derive(Default)]
pub struct MemoryGateway {
    state: RwLock<State>,
    fail_copy: AtomicBool,
    fail_put_stream: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent `copy` calls fail.
    pub fn set_fail_copy(&self, fail: bool) {
        self.fail_copy.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `put_stream` calls fail after draining their input.
    pub fn set_fail_put_stream(&self, fail: bool) {
        self.fail_put_stream.store(fail, Ordering::SeqCst);
    }

    /// Make reads of `(bucket, key)` fail partway through the stream.
    pub async fn poison_key(&self, bucket: &str, key: &str) {
        let mut state = self.state.write().await;
        state
            .poisoned
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Direct content inspection for assertions.
    pub async fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.read().await;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|obj| obj.data.clone())
    }

    async fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) {
        let mut state = self.state.write().await;
        state.buckets.insert(bucket.to_string());
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: (!content_type.is_empty()).then(|| content_type.to_string()),
                metadata: normalize_metadata(metadata),
                last_modified: time::OffsetDateTime::now_utc(),
            },
        );
    }
}

#[async_trait]
impl ObjectGateway for MemoryGateway {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.buckets.insert(bucket.to_string());
        Ok(())
    }

    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) -> StorageResult<()> {
        self.insert(bucket, key, body, content_type, metadata).await;
        Ok(())
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        _size: u64,
        content_type: &str,
        metadata: &Metadata,
    ) -> StorageResult<u64> {
        let mut body = body;
        let mut data = Vec::new();
        while let Some(frame) = body.next().await {
            data.extend_from_slice(&frame?);
        }

        if self.fail_put_stream.load(Ordering::SeqCst) {
            return Err(StorageError::S3("injected put_stream failure".into()));
        }

        let written = data.len() as u64;
        self.insert(bucket, key, Bytes::from(data), content_type, metadata)
            .await;
        Ok(written)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<(Bytes, Option<String>)> {
        let state = self.state.read().await;
        let obj = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok((obj.data.clone(), obj.content_type.clone()))
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<(ByteStream, u64)> {
        let (data, poisoned) = {
            let state = self.state.read().await;
            let obj = state
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
            let poisoned = state
                .poisoned
                .contains(&(bucket.to_string(), key.to_string()));
            (obj.data.clone(), poisoned)
        };

        let size = data.len() as u64;
        // Yield in small frames so consumers exercise real multi-frame reads.
        let frames: Vec<StorageResult<Bytes>> = data
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let stream: ByteStream = if poisoned {
            let mut frames = frames;
            let cut = frames.len() / 2;
            frames.truncate(cut);
            frames.push(Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected read failure",
            ))));
            Box::pin(futures::stream::iter(frames))
        } else {
            Box::pin(futures::stream::iter(frames))
        };

        Ok((stream, size))
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let state = self.state.read().await;
        let obj = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: obj.data.len() as u64,
            content_type: obj.content_type.clone(),
            last_modified: Some(obj.last_modified),
            metadata: obj.metadata.clone(),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .objects
            .remove(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(StorageError::S3("injected copy failure".into()));
        }

        let mut state = self.state.write().await;
        let obj = state
            .objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(src_key.to_string()))?;
        state.buckets.insert(dst_bucket.to_string());
        state
            .objects
            .insert((dst_bucket.to_string(), dst_key.to_string()), obj);
        Ok(())
    }

    async fn create_folder_marker(&self, bucket: &str, path: &str) -> StorageResult<()> {
        let marker_key = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };

        {
            let state = self.state.read().await;
            if state
                .objects
                .contains_key(&(bucket.to_string(), marker_key.clone()))
            {
                return Ok(());
            }
        }

        self.insert(
            bucket,
            &marker_key,
            Bytes::new(),
            "application/x-directory",
            &Metadata::new(),
        )
        .await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
