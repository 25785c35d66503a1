//! The compose engine: streams staged chunks into a single final object
//! while computing the content digest.

use crate::error::ComposeError;
use bytes::Bytes;
use depot_core::hash::{ContentHash, ContentHasher};
use depot_core::message::ChunkCompleteMessage;
use depot_core::path::{file_extension, join_path};
use depot_storage::{ByteStream, Metadata, ObjectGateway, StorageError, StorageResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;

/// Prefix of ephemeral scratch objects in the target bucket.
pub const INTERIM_PREFIX: &str = "_temp_compose/";

/// Bounded pipe depth, in stream frames. The producer blocks once the
/// upload side stalls, which caps memory per in-flight compose.
const PIPE_DEPTH: usize = 8;

/// Result of a successful compose.
#[derive(Clone, Debug)]
pub struct ComposeOutcome {
    /// Digest of the composed byte stream.
    pub digest: ContentHash,
    /// Total bytes streamed.
    pub total_bytes: u64,
    /// Final object key in the target bucket.
    pub final_path: String,
}

/// Streams ordered chunks from staging into one object in the main store.
///
/// Each compose owns its pipe and digest accumulator; there is no
/// cross-compose shared mutable state.
pub struct ComposeEngine {
    staging: Arc<dyn ObjectGateway>,
    main: Arc<dyn ObjectGateway>,
}

impl ComposeEngine {
    pub fn new(staging: Arc<dyn ObjectGateway>, main: Arc<dyn ObjectGateway>) -> Self {
        Self { staging, main }
    }

    /// Compose the staged chunks described by `msg` into
    /// `(msg.target_bucket, final path)`.
    ///
    /// The final object equals the concatenation of the `.part` chunks in
    /// lexicographic key order; the returned digest is computed over that
    /// stream. Staged chunks are deleted best-effort after success.
    #[instrument(skip(self, msg), fields(upload_id = %msg.upload_id, total_chunks = msg.total_chunks))]
    pub async fn compose(&self, msg: &ChunkCompleteMessage) -> Result<ComposeOutcome, ComposeError> {
        let chunks = self.list_chunks(msg).await?;
        tracing::info!(
            chunks = chunks.len(),
            target = %msg.target_bucket,
            "composing staged chunks"
        );

        let ext = extension_of(&msg.file_name);
        let interim_key = interim_key(&msg.upload_id, &ext);
        let content_type = if msg.content_type.is_empty() {
            "application/octet-stream"
        } else {
            &msg.content_type
        };

        let mut metadata = Metadata::new();
        metadata.insert("original-name".to_string(), msg.file_name.clone());
        metadata.insert("content-type".to_string(), content_type.to_string());
        metadata.insert("upload-id".to_string(), msg.upload_id.clone());

        self.main.ensure_bucket(&msg.target_bucket).await?;

        // Single-producer single-consumer pipe: the producer drains chunks
        // in order into the hasher and the pipe, the consumer side feeds the
        // streaming put. Frames carry results so a read failure tears down
        // the upload instead of truncating it.
        let (tx, rx) = mpsc::channel::<StorageResult<Bytes>>(PIPE_DEPTH);

        let producer = tokio::spawn(drain_chunks(
            self.staging.clone(),
            msg.temp_bucket.clone(),
            chunks.clone(),
            tx,
        ));

        let body: ByteStream = Box::pin(ReceiverStream::new(rx));
        let upload_result = self
            .main
            .put_stream(
                &msg.target_bucket,
                &interim_key,
                body,
                msg.file_size.max(0) as u64,
                content_type,
                &metadata,
            )
            .await;

        let producer_result = match producer.await {
            Ok(result) => result,
            Err(join_err) => Err(ComposeError::ReadFailed(format!(
                "chunk producer task failed: {join_err}"
            ))),
        };

        // A closed pipe on the producer side means the upload tore down
        // first; the upload error is the root cause there.
        let streamed = match (producer_result, upload_result) {
            (Ok(produced), Ok(_written)) => Ok(produced),
            (Err(ComposeError::PipeClosed(_)), Err(err)) => {
                Err(ComposeError::UploadFailed(err.to_string()))
            }
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(ComposeError::UploadFailed(err.to_string())),
        };

        let (total_bytes, digest) = match streamed {
            Ok(produced) => produced,
            Err(err) => {
                self.cleanup_interim(&msg.target_bucket, &interim_key).await;
                return Err(err);
            }
        };

        if total_bytes != msg.file_size.max(0) as u64 {
            self.cleanup_interim(&msg.target_bucket, &interim_key).await;
            return Err(ComposeError::SizeMismatch {
                expected: msg.file_size,
                actual: total_bytes,
            });
        }

        let final_path = final_path(&msg.custom_path, &msg.file_name);
        if let Err(err) = self
            .main
            .copy(&msg.target_bucket, &interim_key, &msg.target_bucket, &final_path)
            .await
        {
            self.cleanup_interim(&msg.target_bucket, &interim_key).await;
            return Err(ComposeError::FinalizeFailed(err.to_string()));
        }

        self.cleanup_interim(&msg.target_bucket, &interim_key).await;
        self.spawn_chunk_cleanup(msg.temp_bucket.clone(), chunks);

        tracing::info!(
            path = %final_path,
            digest = %digest,
            size = total_bytes,
            "compose finished"
        );

        Ok(ComposeOutcome {
            digest,
            total_bytes,
            final_path,
        })
    }

    /// List and filter staging keys down to the actual chunk objects.
    async fn list_chunks(&self, msg: &ChunkCompleteMessage) -> Result<Vec<String>, ComposeError> {
        let all_keys = self
            .staging
            .list(&msg.temp_bucket, &msg.temp_prefix)
            .await?;

        let mut chunks: Vec<String> = Vec::with_capacity(all_keys.len());
        for key in &all_keys {
            if key.ends_with('/') {
                tracing::debug!(key = %key, "skipping folder marker");
                continue;
            }
            if key.ends_with(".part") {
                chunks.push(key.clone());
            } else {
                tracing::debug!(key = %key, "skipping non-chunk key");
            }
        }

        if chunks.is_empty() {
            return Err(ComposeError::NoChunks {
                bucket: msg.temp_bucket.clone(),
                prefix: msg.temp_prefix.clone(),
            });
        }
        if chunks.len() != msg.total_chunks {
            return Err(ComposeError::ChunkCountMismatch {
                expected: msg.total_chunks,
                found: chunks.len(),
                total: all_keys.len(),
            });
        }

        chunks.sort();
        Ok(chunks)
    }

    /// Delete the interim object; a missing interim is not an error.
    async fn cleanup_interim(&self, bucket: &str, key: &str) {
        match self.main.delete(bucket, key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(err) => {
                tracing::warn!(bucket, key, error = %err, "failed to delete interim compose object");
            }
        }
    }

    /// Delete staged chunks in a detached task; failures are logged only.
    fn spawn_chunk_cleanup(&self, bucket: String, chunks: Vec<String>) {
        let staging = self.staging.clone();
        tokio::spawn(async move {
            let count = chunks.len();
            for key in chunks {
                if let Err(err) = staging.delete(&bucket, &key).await {
                    tracing::warn!(bucket = %bucket, key = %key, error = %err, "failed to delete staged chunk");
                }
            }
            tracing::debug!(bucket = %bucket, count, "staged chunks cleaned up");
        });
    }
}

/// Producer half of the compose pipe.
///
/// Drains each chunk's stream fully, in order, feeding every frame to both
/// the digest accumulator and the pipe. Returns the total byte count and
/// the digest.
async fn drain_chunks(
    staging: Arc<dyn ObjectGateway>,
    bucket: String,
    chunks: Vec<String>,
    tx: mpsc::Sender<StorageResult<Bytes>>,
) -> Result<(u64, ContentHash), ComposeError> {
    use futures::StreamExt;

    let mut hasher = ContentHasher::default();
    let mut total: u64 = 0;

    for (i, key) in chunks.iter().enumerate() {
        let (mut stream, size_hint) = match staging.get_stream(&bucket, key).await {
            Ok(opened) => opened,
            Err(err) => {
                return Err(ComposeError::ReadFailed(format!(
                    "failed to open chunk {i} ({key}): {err}"
                )));
            }
        };

        let mut chunk_bytes: u64 = 0;
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    // Propagate the failure into the pipe so the upload
                    // side aborts instead of committing a truncated object.
                    let _ = tx
                        .send(Err(StorageError::Io(std::io::Error::other(
                            "compose chunk read failed",
                        ))))
                        .await;
                    return Err(ComposeError::ReadFailed(format!(
                        "failed to stream chunk {i} ({key}): {err}"
                    )));
                }
            };

            hasher.update(&frame);
            chunk_bytes += frame.len() as u64;
            if tx.send(Ok(frame)).await.is_err() {
                // Consumer dropped the pipe; the upload already failed.
                return Err(ComposeError::PipeClosed(format!(
                    "compose pipe closed while streaming chunk {i} ({key})"
                )));
            }
        }

        total += chunk_bytes;
        tracing::debug!(
            chunk = i + 1,
            of = chunks.len(),
            bytes = chunk_bytes,
            size_hint,
            "streamed chunk"
        );
    }

    Ok((total, hasher.finalize()))
}

/// Extension of the final file, `.bin` when the name has none.
pub(crate) fn extension_of(file_name: &str) -> String {
    file_extension(file_name)
        .unwrap_or(".bin")
        .to_string()
}

/// Scratch key used while the composed stream is uploaded.
pub(crate) fn interim_key(upload_id: &str, ext: &str) -> String {
    format!("{INTERIM_PREFIX}{upload_id}{ext}")
}

/// The composed object keeps the original file name; the digest is reported
/// to the caller but not embedded in the path.
pub(crate) fn final_path(custom_path: &str, file_name: &str) -> String {
    join_path(custom_path, file_name)
}
