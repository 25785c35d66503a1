//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// User metadata attached to an object.
///
/// Keys are treated case-insensitively: S3-compatible backends lowercase
/// them, so the gateway normalizes keys to lowercase before sending and
/// callers must not depend on casing.
pub type Metadata = HashMap<String, String>;

/// Metadata about a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Content type (if available).
    pub content_type: Option<String>,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// User metadata, keys lowercased.
    pub metadata: Metadata,
}

/// Typed operations over an S3-compatible object store.
///
/// Every operation addresses objects as `(bucket, key)`. All operations are
/// cancel-safe: dropping the returned future aborts the in-flight request.
#[async_trait]
pub trait ObjectGateway: Send + Sync + 'static {
    /// Ensure a bucket exists (head-then-create). Idempotent; concurrent
    /// invocations race but converge.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Buffered put with user metadata.
    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) -> StorageResult<()>;

    /// Streaming put. The stream is consumed exactly once; `size` is the
    /// expected object size in bytes. Returns the number of bytes written.
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
        metadata: &Metadata,
    ) -> StorageResult<u64>;

    /// Buffered read. Returns the object bytes and stored content type.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<(Bytes, Option<String>)>;

    /// Streaming read. Returns the byte stream and the object size.
    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<(ByteStream, u64)>;

    /// Get object metadata without fetching content.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Delete an object. Returns `NotFound` if the object does not exist.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// List object keys under a prefix, in backend order (lexicographic for
    /// S3-compatible stores).
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    /// Server-side copy without streaming through the client.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()>;

    /// Ensure a zero-byte folder marker at `path + "/"` with content type
    /// `application/x-directory`. No-op when already present.
    async fn create_folder_marker(&self, bucket: &str, path: &str) -> StorageResult<()>;

    /// Static identifier for the backend type, used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity. Called during startup so the service
    /// does not report healthy when storage is unreachable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Lowercase user-metadata keys for backend round-trip stability.
pub(crate) fn normalize_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_metadata_lowercases_keys() {
        let mut metadata = Metadata::new();
        metadata.insert("Original-Name".to_string(), "a.txt".to_string());
        metadata.insert("file-hash".to_string(), "ab".to_string());

        let normalized = normalize_metadata(&metadata);
        assert_eq!(normalized.get("original-name").map(String::as_str), Some("a.txt"));
        assert_eq!(normalized.get("file-hash").map(String::as_str), Some("ab"));
        assert!(!normalized.contains_key("Original-Name"));
    }
}
