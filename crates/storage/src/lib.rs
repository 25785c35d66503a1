//! Object storage gateway for the depot upload service.
//!
//! This crate provides:
//! - The `ObjectGateway` trait: typed operations over an S3-compatible
//!   backend, addressed as `(bucket, key)`
//! - The AWS SDK backed `S3Gateway`
//! - An in-memory gateway used by tests across the workspace

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{memory::MemoryGateway, s3::S3Gateway};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, Metadata, ObjectGateway, ObjectMeta};

use depot_core::config::StoreConfig;
use std::sync::Arc;

/// Create an object gateway from store configuration.
pub async fn from_config(config: &StoreConfig) -> StorageResult<Arc<dyn ObjectGateway>> {
    let gateway = S3Gateway::new(config).await?;
    Ok(Arc::new(gateway))
}

/// Wrap in-memory bytes as a [`ByteStream`].
pub fn bytes_stream(data: bytes::Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
