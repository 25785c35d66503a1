//! Parquet-backed deduplication index for the depot upload service.
//!
//! The index is the authoritative view of what this service uploaded:
//! a single Snappy-compressed parquet file in a reserved bucket, mapping
//! (bucket, content digest) to the path that content lives at.

pub mod error;
mod index;
mod record;

pub use error::{IndexError, IndexResult};
pub use index::{FileIndex, INDEX_BUCKET, INDEX_KEY, IndexStats};
pub use record::{FileRecord, decode_records, encode_records};
