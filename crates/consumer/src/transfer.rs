//! The transfer engine: moves a single pre-staged object to its final
//! location without local buffering.

use crate::error::{ComposeError, ComposeResult};
use depot_core::message::TransferMessage;
use depot_core::path::{file_extension, join_path};
use depot_storage::{Metadata, ObjectGateway};
use std::sync::Arc;
use tracing::instrument;

/// Result of a successful transfer.
#[derive(Clone, Debug)]
pub struct TransferOutcome {
    /// Final object key in the target bucket.
    pub final_path: String,
    /// Bytes forwarded.
    pub total_bytes: u64,
    pub content_type: String,
}

/// Streams one staged object into the main store.
///
/// Unlike compose, the caller is trusted for the digest: the final name is
/// `<file_hash><ext>`, optionally under the message's `custom_path`, and no
/// digest is recomputed.
pub struct TransferEngine {
    staging: Arc<dyn ObjectGateway>,
    main: Arc<dyn ObjectGateway>,
}

impl TransferEngine {
    pub fn new(staging: Arc<dyn ObjectGateway>, main: Arc<dyn ObjectGateway>) -> Self {
        Self { staging, main }
    }

    #[instrument(skip(self, msg), fields(temp = %msg.temp_path, target = %msg.target_bucket))]
    pub async fn transfer(&self, msg: &TransferMessage) -> ComposeResult<TransferOutcome> {
        msg.validate()
            .map_err(|e| ComposeError::InvalidMessage(e.to_string()))?;

        let content_type = msg
            .metadata
            .get("content_type")
            .filter(|ct| !ct.is_empty())
            .map(String::as_str)
            .unwrap_or("application/octet-stream");

        let final_path = final_transfer_path(msg);

        self.main.ensure_bucket(&msg.target_bucket).await?;

        let (body, staged_size) = self
            .staging
            .get_stream(&msg.temp_bucket, &msg.temp_path)
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert("file-hash".to_string(), msg.file_hash.clone());
        metadata.insert("original-name".to_string(), msg.original_name.clone());
        metadata.insert("content-type".to_string(), content_type.to_string());
        for (k, v) in &msg.metadata {
            metadata.insert(k.clone(), v.clone());
        }

        let written = self
            .main
            .put_stream(
                &msg.target_bucket,
                &final_path,
                body,
                staged_size,
                content_type,
                &metadata,
            )
            .await
            .map_err(|e| ComposeError::UploadFailed(e.to_string()))?;

        // The staged copy is no longer needed; losing this delete only
        // leaks a temp object.
        if let Err(err) = self.staging.delete(&msg.temp_bucket, &msg.temp_path).await {
            tracing::warn!(
                bucket = %msg.temp_bucket,
                key = %msg.temp_path,
                error = %err,
                "failed to delete staged transfer object"
            );
        }

        tracing::info!(path = %final_path, size = written, "transfer finished");

        Ok(TransferOutcome {
            final_path,
            total_bytes: written,
            content_type: content_type.to_string(),
        })
    }
}

/// Final key for a transferred object: digest as filename, extension from
/// the original name (falling back to the staged key), under the message's
/// custom path when present.
fn final_transfer_path(msg: &TransferMessage) -> String {
    let ext = file_extension(&msg.original_name)
        .or_else(|| file_extension(&msg.temp_path))
        .unwrap_or("");

    let custom_path = msg
        .metadata
        .get("custom_path")
        .map(String::as_str)
        .unwrap_or("");

    join_path(custom_path, &format!("{}{}", msg.file_hash, ext))
}
