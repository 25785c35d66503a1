//! Compose and transfer error types.

use thiserror::Error;

/// Errors from the compose and transfer engines.
///
/// All variants are fatal for the current attempt; they are surfaced to the
/// orchestrator in the completion notification with `success = false`.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("no chunks found in {bucket}/{prefix}")]
    NoChunks { bucket: String, prefix: String },

    #[error("chunk count mismatch: expected {expected}, found {found} (total objects: {total})")]
    ChunkCountMismatch {
        expected: usize,
        found: usize,
        total: usize,
    },

    #[error("composed size mismatch: expected {expected} bytes, streamed {actual}")]
    SizeMismatch { expected: i64, actual: u64 },

    #[error("failed to read chunk stream: {0}")]
    ReadFailed(String),

    #[error("compose pipe closed: {0}")]
    PipeClosed(String),

    #[error("failed to upload composed object: {0}")]
    UploadFailed(String),

    #[error("failed to move composed object to final location: {0}")]
    FinalizeFailed(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),
}

/// Result type for engine operations.
pub type ComposeResult<T> = std::result::Result<T, ComposeError>;
