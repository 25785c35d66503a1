//! Delivery handling: parse, dispatch to the engines, build notifications.

use crate::compose::ComposeEngine;
use crate::error::ComposeError;
use crate::transfer::TransferEngine;
use depot_core::message::{ChunkCompleteMessage, ComposeCompletedMessage, TransferMessage};
use time::OffsetDateTime;
use tracing::instrument;

/// Processes `upload.chunk_complete` deliveries.
pub struct ChunkCompleteHandler {
    engine: ComposeEngine,
}

impl ChunkCompleteHandler {
    pub fn new(engine: ComposeEngine) -> Self {
        Self { engine }
    }

    /// Handle one delivery payload.
    ///
    /// Returns the completion notification to publish. A payload that does
    /// not parse yields `Err`; the caller nacks it without requeue and no
    /// notification is produced.
    #[instrument(skip(self, body))]
    pub async fn handle(&self, body: &[u8]) -> Result<ComposeCompletedMessage, serde_json::Error> {
        let msg: ChunkCompleteMessage = serde_json::from_slice(body)?;

        tracing::info!(
            upload_id = %msg.upload_id,
            file = %msg.file_name,
            chunks = msg.total_chunks,
            target = %msg.target_bucket,
            "processing chunk-complete message"
        );

        let result = self.engine.compose(&msg).await;
        Ok(completion_for(&msg, result))
    }
}

/// Build the completion notification for a compose attempt.
///
/// Every consumed message yields exactly one notification; failures carry
/// the error text and `success = false`.
pub fn completion_for(
    msg: &ChunkCompleteMessage,
    result: Result<crate::compose::ComposeOutcome, ComposeError>,
) -> ComposeCompletedMessage {
    let mut response = ComposeCompletedMessage {
        upload_id: msg.upload_id.clone(),
        bucket_id: msg.bucket_id.clone(),
        user_id: msg.user_id.clone(),
        content_type: msg.content_type.clone(),
        file_name: msg.file_name.clone(),
        custom_path: msg.custom_path.clone(),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        ..Default::default()
    };

    match result {
        Ok(outcome) => {
            response.success = true;
            response.file_hash = outcome.digest.to_hex();
            response.file_path = outcome.final_path;
            response.file_size = outcome.total_bytes as i64;
        }
        Err(err) => {
            tracing::warn!(upload_id = %msg.upload_id, error = %err, "compose failed");
            response.success = false;
            response.error = err.to_string();
        }
    }

    response
}

/// Processes transfer deliveries for pre-staged large files.
pub struct TransferHandler {
    engine: TransferEngine,
}

impl TransferHandler {
    pub fn new(engine: TransferEngine) -> Self {
        Self { engine }
    }

    /// Handle one delivery payload. Parse and engine failures both surface
    /// as `Err`; the caller nacks without requeue.
    #[instrument(skip(self, body))]
    pub async fn handle(&self, body: &[u8]) -> Result<(), ComposeError> {
        let msg: TransferMessage = serde_json::from_slice(body)
            .map_err(|e| ComposeError::InvalidMessage(e.to_string()))?;

        tracing::info!(
            file = %msg.original_name,
            hash = %msg.file_hash,
            size = msg.file_size,
            "processing transfer message"
        );

        self.engine.transfer(&msg).await?;
        Ok(())
    }
}
