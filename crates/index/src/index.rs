//! The dedup index over the object gateway.

use crate::error::IndexResult;
use crate::record::{FileRecord, decode_records, encode_records};
use depot_storage::{Metadata, ObjectGateway, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Reserved bucket holding the index file.
pub const INDEX_BUCKET: &str = "metadata";
/// Key of the single columnar index blob.
pub const INDEX_KEY: &str = "files-metadata.parquet";

/// Aggregate statistics over the index.
#[derive(Clone, Debug, Default)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_size: i64,
    pub by_bucket: HashMap<String, usize>,
    pub by_content_type: HashMap<String, usize>,
}

/// Persistent mapping (bucket, digest) -> (path, metadata), stored as one
/// parquet blob in the reserved `metadata` bucket.
///
/// Every mutation is read-modify-write of the whole file, which bounds the
/// index to what fits comfortably in memory (~10^6 entries, accepted). A
/// process-local mutex serializes intra-process writers; there is no
/// cross-process locking, so concurrent processes may lose updates (last
/// writer wins). The upload path's correctness does not depend on the
/// index: a lost write costs at worst a re-upload of a duplicate.
pub struct FileIndex {
    gateway: Arc<dyn ObjectGateway>,
    write_lock: Mutex<()>,
}

impl FileIndex {
    /// Create an index over the given gateway.
    pub fn new(gateway: Arc<dyn ObjectGateway>) -> Self {
        Self {
            gateway,
            write_lock: Mutex::new(()),
        }
    }

    /// Load all records. A missing index file is an empty index.
    pub async fn load(&self) -> IndexResult<Vec<FileRecord>> {
        self.gateway.ensure_bucket(INDEX_BUCKET).await?;
        match self.gateway.get(INDEX_BUCKET, INDEX_KEY).await {
            Ok((data, _)) => decode_records(data),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Serialize and persist the full record set.
    pub async fn save(&self, records: &[FileRecord]) -> IndexResult<()> {
        self.gateway.ensure_bucket(INDEX_BUCKET).await?;
        let blob = encode_records(records)?;
        self.gateway
            .put_bytes(
                INDEX_BUCKET,
                INDEX_KEY,
                blob,
                "application/octet-stream",
                &Metadata::new(),
            )
            .await?;
        Ok(())
    }

    /// Find the stored path for (bucket, digest). Linear scan.
    #[instrument(skip(self))]
    pub async fn lookup(&self, bucket: &str, digest: &str) -> IndexResult<Option<String>> {
        let records = self.load().await?;
        Ok(records
            .iter()
            .find(|r| r.file_hash == digest && r.bucket_name == bucket)
            .map(|r| r.file_path.clone()))
    }

    /// Insert a record, replacing any existing row with the same
    /// (digest, bucket).
    #[instrument(skip(self, record), fields(bucket = %record.bucket_name, digest = %record.file_hash))]
    pub async fn add(&self, record: FileRecord) -> IndexResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;

        match records
            .iter_mut()
            .find(|r| r.file_hash == record.file_hash && r.bucket_name == record.bucket_name)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        self.save(&records).await
    }

    /// Remove rows matching both bucket and path.
    #[instrument(skip(self))]
    pub async fn remove(&self, bucket: &str, path: &str) -> IndexResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        records.retain(|r| !(r.file_path == path && r.bucket_name == bucket));
        self.save(&records).await
    }

    /// All records with the given digest, across buckets.
    #[instrument(skip(self))]
    pub async fn search_by_digest(&self, digest: &str) -> IndexResult<Vec<FileRecord>> {
        let records = self.load().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.file_hash == digest)
            .collect())
    }

    /// Aggregate statistics over the index.
    pub async fn stats(&self) -> IndexResult<IndexStats> {
        let records = self.load().await?;
        let mut stats = IndexStats {
            total_files: records.len(),
            ..Default::default()
        };
        for record in &records {
            stats.total_size += record.file_size;
            *stats.by_bucket.entry(record.bucket_name.clone()).or_default() += 1;
            *stats
                .by_content_type
                .entry(record.content_type.clone())
                .or_default() += 1;
        }
        Ok(stats)
    }

    /// Drop rows whose underlying object no longer exists. Returns the
    /// number of rows removed.
    ///
    /// Only a definitive NotFound drops a row; transient head failures keep
    /// it so an outage cannot empty the index.
    #[instrument(skip(self))]
    pub async fn optimize(&self) -> IndexResult<usize> {
        let _guard = self.write_lock.lock().await;
        let records = self.load().await?;

        let mut valid = Vec::with_capacity(records.len());
        let mut removed = 0usize;

        for record in records {
            match self
                .gateway
                .head(&record.bucket_name, &record.file_path)
                .await
            {
                Ok(_) => valid.push(record),
                Err(StorageError::NotFound(_)) => {
                    tracing::debug!(
                        bucket = %record.bucket_name,
                        path = %record.file_path,
                        "dropping index row for missing object"
                    );
                    removed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        bucket = %record.bucket_name,
                        path = %record.file_path,
                        error = %err,
                        "keeping index row, head failed"
                    );
                    valid.push(record);
                }
            }
        }

        if removed > 0 {
            self.save(&valid).await?;
        }
        Ok(removed)
    }
}
