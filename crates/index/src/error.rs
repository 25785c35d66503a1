//! Index error types.

use thiserror::Error;

/// Dedup index errors.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for index operations.
pub type IndexResult<T> = std::result::Result<T, IndexError>;
