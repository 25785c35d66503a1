//! Core domain types and shared logic for the depot upload service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and incremental hashing
//! - Object path and filename sanitization
//! - Content-type detection and the MIME extension table
//! - Broker message contracts
//! - Configuration loading

pub mod config;
pub mod error;
pub mod hash;
pub mod message;
pub mod mime;
pub mod path;

pub use config::{AppConfig, BrokerConfig, ServerConfig, StoreConfig, UploadConfig};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use message::{ChunkCompleteMessage, ComposeCompletedMessage, TransferMessage};

/// Default maximum accepted upload size: 100 MiB.
pub const DEFAULT_FILE_MAX_SIZE: u64 = 100 * 1024 * 1024;
