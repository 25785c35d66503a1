//! Broker message contracts.
//!
//! These mirror the JSON payloads exchanged with the upload orchestrator.
//! All fields are defaulted so partially-populated messages from older
//! producers still parse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Received when all chunks of a large upload have landed in staging.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkCompleteMessage {
    /// Opaque correlation id assigned by the orchestrator.
    pub upload_id: String,
    pub bucket_id: String,
    pub bucket_name: String,
    pub user_id: String,
    /// Bucket in the staging store holding the chunks.
    pub temp_bucket: String,
    /// Prefix under which the chunks live, e.g. `{upload_id}/`.
    pub temp_prefix: String,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    pub custom_path: String,
    pub total_chunks: usize,
    pub target_bucket: String,
    pub target_path: String,
    pub metadata: HashMap<String, String>,
    pub timestamp: i64,
}

/// Published after a compose attempt, success or failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeCompletedMessage {
    pub upload_id: String,
    pub bucket_id: String,
    pub user_id: String,
    pub file_hash: String,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub file_name: String,
    pub custom_path: String,
    pub success: bool,
    pub error: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Received for a single pre-staged large file to move into place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferMessage {
    /// e.g. "zip", "video", "archive".
    pub upload_type: String,
    pub temp_bucket: String,
    pub temp_path: String,
    pub target_bucket: String,
    pub target_folder: String,
    /// Original file name before hashing.
    pub original_name: String,
    pub file_hash: String,
    pub file_size: i64,
    pub chunk_size: i64,
    pub metadata: HashMap<String, String>,
}

impl TransferMessage {
    /// Validate required fields.
    pub fn validate(&self) -> crate::Result<()> {
        if self.temp_bucket.is_empty() {
            return Err(crate::Error::InvalidMessage("temp_bucket is required".into()));
        }
        if self.temp_path.is_empty() {
            return Err(crate::Error::InvalidMessage("temp_path is required".into()));
        }
        if self.target_bucket.is_empty() {
            return Err(crate::Error::InvalidMessage(
                "target_bucket is required".into(),
            ));
        }
        if self.file_hash.is_empty() {
            return Err(crate::Error::InvalidMessage("file_hash is required".into()));
        }
        if self.file_size <= 0 {
            return Err(crate::Error::InvalidMessage(
                "file_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_complete_parses_partial_payload() {
        let msg: ChunkCompleteMessage = serde_json::from_str(
            r#"{"upload_id":"u1","temp_bucket":"staging","temp_prefix":"u1/",
                "file_name":"out.bin","file_size":8,"total_chunks":3,
                "target_bucket":"b2","custom_path":"d"}"#,
        )
        .unwrap();
        assert_eq!(msg.upload_id, "u1");
        assert_eq!(msg.total_chunks, 3);
        assert_eq!(msg.file_size, 8);
        assert!(msg.metadata.is_empty());
        assert!(msg.content_type.is_empty());
    }

    #[test]
    fn test_compose_completed_round_trip() {
        let msg = ComposeCompletedMessage {
            upload_id: "u1".into(),
            file_hash: "ab".repeat(32),
            file_path: "d/out.bin".into(),
            file_size: 8,
            success: true,
            timestamp: 1_700_000_000,
            ..Default::default()
        };
        let body = serde_json::to_vec(&msg).unwrap();
        let parsed: ComposeCompletedMessage = serde_json::from_slice(&body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.file_path, "d/out.bin");
        assert!(parsed.error.is_empty());
    }

    #[test]
    fn test_transfer_message_validation() {
        let mut msg = TransferMessage {
            temp_bucket: "t".into(),
            temp_path: "p".into(),
            target_bucket: "b".into(),
            file_hash: "h".into(),
            file_size: 1,
            ..Default::default()
        };
        assert!(msg.validate().is_ok());

        msg.file_size = 0;
        assert!(msg.validate().is_err());
        msg.file_size = 1;
        msg.temp_bucket.clear();
        assert!(msg.validate().is_err());
    }
}
